//! Local media capture.
//!
//! Capture devices belong to the host platform. This module only defines the
//! acquisition seam ([`MediaDevices`]) and the track set handed to a session.

use crate::error::{RendezvousError, Result};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn from_codec_type(codec_type: RTPCodecType) -> Option<Self> {
        match codec_type {
            RTPCodecType::Audio => Some(Self::Audio),
            RTPCodecType::Video => Some(Self::Video),
            _ => None,
        }
    }

    fn codec(self) -> RTCRtpCodecCapability {
        match self {
            Self::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            Self::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// A captured local track.
///
/// Holds the device until [`LocalTrack::stop`] is called.
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
    stopped: CancellationToken,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let id = id.into();
        let track = TrackLocalStaticSample::new(kind.codec(), id.clone(), stream_id.into());
        Self {
            id,
            kind,
            track: Arc::new(track),
            stopped: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// The sample track added to peer connections.
    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    /// Writes one encoded media sample to the track.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()> {
        if self.is_stopped() {
            return Err(RendezvousError::ConnectionClosed);
        }
        self.track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Releases the underlying device. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.is_cancelled() {
            tracing::debug!("Stopping {} track {}", self.kind, self.id);
            self.stopped.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Resolves once the track is stopped.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Tracks obtained from one acquisition.
#[derive(Debug, Clone, Default)]
pub struct LocalTrackSet {
    tracks: Vec<Arc<LocalTrack>>,
}

impl LocalTrackSet {
    pub fn new(tracks: Vec<Arc<LocalTrack>>) -> Self {
        Self { tracks }
    }

    /// A set without tracks, for data-only sessions.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn of_kind(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// Stops every track in the set.
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Which kinds of media to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Source of local capture tracks.
pub trait MediaDevices: Send + Sync {
    /// Acquires one track per requested kind
    fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> impl std::future::Future<Output = Result<LocalTrackSet>> + Send;
}

/// Devices backed by sample tracks the caller writes encoded media into.
///
/// Audio tracks are Opus at 48 kHz, video tracks are VP8.
#[derive(Debug, Clone)]
pub struct SampleDevices {
    stream_id: String,
}

impl SampleDevices {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }
}

impl Default for SampleDevices {
    fn default() -> Self {
        Self::new("rendezvous")
    }
}

impl MediaDevices for SampleDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalTrackSet> {
        let mut tracks = Vec::new();
        for (wanted, kind) in [
            (constraints.audio, TrackKind::Audio),
            (constraints.video, TrackKind::Video),
        ] {
            if wanted {
                let id = format!("{}-{:08x}", kind, rand::random::<u32>());
                tracks.push(Arc::new(LocalTrack::new(kind, id, self.stream_id.clone())));
            }
        }
        Ok(LocalTrackSet::new(tracks))
    }
}

/// Acquires tracks, failing instead of staying pending forever.
///
/// Denied or unavailable devices and acquisitions that take longer than
/// `timeout` are all reported as [`RendezvousError::MediaAcquisition`].
pub async fn acquire_with_timeout<D: MediaDevices>(
    devices: &D,
    constraints: MediaConstraints,
    timeout: Duration,
) -> Result<LocalTrackSet> {
    if !constraints.audio && !constraints.video {
        return Err(RendezvousError::MediaAcquisition(
            "neither audio nor video requested".to_string(),
        ));
    }

    match tokio::time::timeout(timeout, devices.acquire(constraints)).await {
        Ok(Ok(tracks)) => {
            tracing::debug!("Acquired {} local tracks", tracks.len());
            Ok(tracks)
        }
        Ok(Err(RendezvousError::MediaAcquisition(reason))) => {
            Err(RendezvousError::MediaAcquisition(reason))
        }
        Ok(Err(e)) => Err(RendezvousError::MediaAcquisition(e.to_string())),
        Err(_) => Err(RendezvousError::MediaAcquisition(format!(
            "no devices after {:?}",
            timeout
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PendingDevices;

    impl MediaDevices for PendingDevices {
        async fn acquire(&self, _constraints: MediaConstraints) -> Result<LocalTrackSet> {
            std::future::pending().await
        }
    }

    struct DeniedDevices;

    impl MediaDevices for DeniedDevices {
        async fn acquire(&self, _constraints: MediaConstraints) -> Result<LocalTrackSet> {
            Err(RendezvousError::InvalidState("permission denied".to_string()))
        }
    }

    #[tokio::test]
    async fn acquires_requested_kinds() {
        let devices = SampleDevices::default();
        let set = acquire_with_timeout(
            &devices,
            MediaConstraints {
                audio: true,
                video: false,
            },
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.of_kind(TrackKind::Audio).count(), 1);
        assert_eq!(set.of_kind(TrackKind::Video).count(), 0);

        let both = devices.acquire(MediaConstraints::default()).await.unwrap();
        assert_eq!(both.len(), 2);
        let ids: Vec<_> = both.iter().map(|t| t.id().to_string()).collect();
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn nothing_requested_is_an_error() {
        let err = acquire_with_timeout(
            &SampleDevices::default(),
            MediaConstraints {
                audio: false,
                video: false,
            },
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RendezvousError::MediaAcquisition(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_acquisition_times_out() {
        let err = acquire_with_timeout(
            &PendingDevices,
            MediaConstraints::default(),
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RendezvousError::MediaAcquisition(_)));
    }

    #[tokio::test]
    async fn denied_acquisition_is_reported() {
        let err = acquire_with_timeout(
            &DeniedDevices,
            MediaConstraints::default(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        match err {
            RendezvousError::MediaAcquisition(reason) => assert!(reason.contains("denied")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_releases_every_track() {
        let set = SampleDevices::default()
            .acquire(MediaConstraints::default())
            .await
            .unwrap();
        let tracks: Vec<_> = set.iter().cloned().collect();
        set.stop();
        for track in &tracks {
            assert!(track.is_stopped());
            track.stopped().await;
            assert!(matches!(
                track.write_sample(Bytes::new(), Duration::from_millis(20)).await,
                Err(RendezvousError::ConnectionClosed)
            ));
        }
        set.stop();
    }
}
