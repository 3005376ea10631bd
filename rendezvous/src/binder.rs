//! Routes media tracks to rendering sinks by kind.

use crate::error::{RendezvousError, Result};
use crate::media::{LocalTrack, LocalTrackSet, TrackKind};
use crate::peer::{Peer, RemoteTrackEvent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Source shown by a sink.
#[derive(Debug, Clone)]
pub enum StreamHandle<R> {
    /// Preview of a captured local track
    Local(Arc<LocalTrack>),
    Remote(R),
}

/// Rendering target owned by the presentation layer.
pub trait MediaSink<R>: Send + Sync {
    /// Replaces whatever the sink was showing with `source`.
    fn set_source(&self, source: StreamHandle<R>);

    fn clear(&self);
}

/// Sinks a session renders into. Missing sinks are skipped.
pub struct Sinks<R> {
    pub local_video: Option<Arc<dyn MediaSink<R>>>,
    pub remote_audio: Option<Arc<dyn MediaSink<R>>>,
    pub remote_video: Option<Arc<dyn MediaSink<R>>>,
}

impl<R> Default for Sinks<R> {
    fn default() -> Self {
        Self {
            local_video: None,
            remote_audio: None,
            remote_video: None,
        }
    }
}

impl<R> Clone for Sinks<R> {
    fn clone(&self) -> Self {
        Self {
            local_video: self.local_video.clone(),
            remote_audio: self.remote_audio.clone(),
            remote_video: self.remote_video.clone(),
        }
    }
}

impl<R> Sinks<R> {
    fn remote(&self, kind: TrackKind) -> Option<&Arc<dyn MediaSink<R>>> {
        match kind {
            TrackKind::Audio => self.remote_audio.as_ref(),
            TrackKind::Video => self.remote_video.as_ref(),
        }
    }
}

/// Keeps at most one active remote source per media kind.
pub struct TrackBinder<R> {
    sinks: Sinks<R>,
    active: HashMap<TrackKind, R>,
    attached: HashSet<String>,
}

impl<R: Clone> TrackBinder<R> {
    pub fn new(sinks: Sinks<R>) -> Self {
        Self {
            sinks,
            active: HashMap::new(),
            attached: HashSet::new(),
        }
    }

    /// Binds a remote track to the sink for its kind.
    ///
    /// Returns the source it replaced, if any.
    pub fn on_remote_track(&mut self, event: RemoteTrackEvent<R>) -> Option<R> {
        if let Some(sink) = self.sinks.remote(event.kind) {
            sink.set_source(StreamHandle::Remote(event.stream.clone()));
        }
        let previous = self.active.insert(event.kind, event.stream);
        if previous.is_some() {
            tracing::debug!("Replaced remote {} source", event.kind);
        }
        previous
    }

    /// Unbinds the remote source of `kind`.
    pub fn remove(&mut self, kind: TrackKind) -> Option<R> {
        let removed = self.active.remove(&kind);
        if removed.is_some() {
            if let Some(sink) = self.sinks.remote(kind) {
                sink.clear();
            }
        }
        removed
    }

    pub fn active(&self, kind: TrackKind) -> Option<&R> {
        self.active.get(&kind)
    }

    /// Adds every local track to the peer and mirrors video to the preview sink.
    ///
    /// Adding a track that was already added fails with
    /// [`RendezvousError::DuplicateTrack`].
    pub async fn attach_local<P: Peer>(&mut self, peer: &P, tracks: &LocalTrackSet) -> Result<()> {
        for track in tracks.iter() {
            if !self.attached.insert(track.id().to_owned()) {
                return Err(RendezvousError::DuplicateTrack(track.id().to_owned()));
            }
            peer.add_track(track.clone()).await?;

            if track.kind() == TrackKind::Video {
                if let Some(sink) = &self.sinks.local_video {
                    sink.set_source(StreamHandle::Local(track.clone()));
                }
            }
            tracing::debug!("Attached local {} track {}", track.kind(), track.id());
        }
        Ok(())
    }

    /// Clears every sink this binder wrote to.
    pub fn clear(&mut self) {
        for kind in [TrackKind::Audio, TrackKind::Video] {
            self.remove(kind);
        }
        if !self.attached.is_empty() {
            if let Some(sink) = &self.sinks.local_video {
                sink.clear();
            }
        }
    }
}
