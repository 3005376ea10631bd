//! Rendezvous topic naming.
//!
//! Both endpoints must compute the identical topic string to find each other,
//! so the derivation is a pure function of the shared context value.

use super::constants::TOPIC_PREFIX;
use crate::error::{RendezvousError, Result};
use std::fmt;

/// Pub/sub topic a rendezvous channel is addressed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Uses `name` verbatim as the topic.
    ///
    /// # Examples
    ///
    /// ```
    /// let topic = rendezvous::Topic::new("room-42").unwrap();
    /// assert_eq!(topic.as_str(), "room-42");
    /// ```
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RendezvousError::InvalidTopic("topic is empty".to_string()));
        }
        Ok(Self(name))
    }

    /// Derives the topic from a context value both endpoints hold.
    ///
    /// When the context is a link, only the part after the first `#` is used, so
    /// `https://a.example/call#room-42` and `#room-42` name the same topic.
    /// Leading slashes and surrounding whitespace are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use rendezvous::Topic;
    /// let a = Topic::from_context("https://a.example/call#room-42").unwrap();
    /// let b = Topic::from_context("#room-42").unwrap();
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str(), "rendezvous/room-42");
    /// ```
    pub fn from_context(context: &str) -> Result<Self> {
        let fragment = match context.split_once('#') {
            Some((_, fragment)) => fragment,
            None => context,
        };
        let room = fragment.trim().trim_start_matches('/').trim();
        if room.is_empty() {
            return Err(RendezvousError::InvalidTopic(format!(
                "no rendezvous identifier in context {:?}",
                context
            )));
        }
        Ok(Self(format!("{}{}", TOPIC_PREFIX, room)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_and_bare_context_agree() {
        let from_link = Topic::from_context("https://gateway.example/ipns/app/#/room-42").unwrap();
        let from_fragment = Topic::from_context("room-42").unwrap();
        assert_eq!(from_link, from_fragment);
        assert_eq!(from_link.to_string(), "rendezvous/room-42");
    }

    #[test]
    fn test_only_first_hash_splits() {
        let topic = Topic::from_context("https://x.example/#a#b").unwrap();
        assert_eq!(topic.as_str(), "rendezvous/a#b");
    }

    #[test]
    fn test_empty_context_rejected() {
        assert!(Topic::from_context("https://x.example/#").is_err());
        assert!(Topic::from_context("   ").is_err());
        assert!(Topic::new("").is_err());
    }
}
