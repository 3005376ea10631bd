//! Re-exports the [`rendezvous`] library for convenient access to signaling and session types.
#[cfg(feature = "rendezvous")]
pub use rendezvous;
