//! Local capture source acquisition.

use crate::error::MediaError;
use crate::peer::types::TrackKind;
use crate::utils::random_id;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Audio processing switches requested from the capture device
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AudioProcessing {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConstraints {
    pub video: bool,
    #[serde(default)]
    pub audio_processing: AudioProcessing,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio_processing: AudioProcessing::default(),
        }
    }
}

/// One captured track, attachable to a transport
#[derive(Clone)]
pub struct LocalTrack {
    pub kind: TrackKind,
    pub track: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, id: &str, stream_id: &str) -> Self {
        let mime_type = match kind {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.to_owned(),
            stream_id.to_owned(),
        );
        Self {
            kind,
            track: Arc::new(track),
        }
    }

    pub fn id(&self) -> &str {
        self.track.id()
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("id", &self.id())
            .finish()
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Acquired local stream. Owned by the session, released exactly once.
pub struct MediaHandle {
    stream_id: String,
    tracks: Vec<LocalTrack>,
    constraints: CaptureConstraints,
    stopped: AtomicBool,
    on_release: Mutex<Option<ReleaseHook>>,
}

impl MediaHandle {
    pub fn new(stream_id: String, tracks: Vec<LocalTrack>, constraints: CaptureConstraints) -> Self {
        Self {
            stream_id,
            tracks,
            constraints,
            stopped: AtomicBool::new(false),
            on_release: Mutex::new(None),
        }
    }

    /// Runs `hook` when the handle is stopped, i.e. when the device is given back
    pub fn with_release_hook(self, hook: impl FnOnce() + Send + 'static) -> Self {
        if let Ok(mut slot) = self.on_release.lock() {
            *slot = Some(Box::new(hook));
        }
        self
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn constraints(&self) -> CaptureConstraints {
        self.constraints
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stops every track. Returns false if the handle was already stopped.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        let hook = self.on_release.lock().ok().and_then(|mut slot| slot.take());
        if let Some(hook) = hook {
            hook();
        }
        debug!(stream = %self.stream_id, tracks = self.tracks.len(), "local media stopped");
        true
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaHandle")
            .field("stream_id", &self.stream_id)
            .field("tracks", &self.tracks)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// May block on a user permission prompt
    async fn acquire(&self, constraints: CaptureConstraints) -> Result<MediaHandle, MediaError>;
}

/// Provider backed by sample-fed tracks: the host writes captured frames into them
#[derive(Debug, Clone, Default)]
pub struct SampleTrackProvider {
    video_available: bool,
}

impl SampleTrackProvider {
    pub fn new() -> Self {
        Self {
            video_available: true,
        }
    }

    /// Provider for a host without a camera
    pub fn audio_only() -> Self {
        Self {
            video_available: false,
        }
    }
}

#[async_trait]
impl MediaProvider for SampleTrackProvider {
    async fn acquire(&self, constraints: CaptureConstraints) -> Result<MediaHandle, MediaError> {
        if constraints.video && !self.video_available {
            return Err(MediaError::NoDevice("camera".into()));
        }

        let stream_id = format!("local-{}", random_id());
        let mut tracks = vec![LocalTrack::new(TrackKind::Audio, "audio", &stream_id)];
        if constraints.video {
            tracks.push(LocalTrack::new(TrackKind::Video, "video", &stream_id));
        }
        info!(
            stream = %stream_id,
            video = constraints.video,
            echo_cancellation = constraints.audio_processing.echo_cancellation,
            noise_suppression = constraints.audio_processing.noise_suppression,
            auto_gain_control = constraints.audio_processing.auto_gain_control,
            "local media acquired"
        );
        Ok(MediaHandle::new(stream_id, tracks, constraints))
    }
}
