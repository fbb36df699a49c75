use crate::session::CallState;
use thiserror::Error;

/// Local capture device could not be acquired
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission to use camera/microphone was denied")]
    PermissionDenied,
    #[error("no capture device available: {0}")]
    NoDevice(String),
}

/// Failures reported by the session transport facade
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("media transport unavailable: {0}")]
    Unavailable(String),
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("out-of-sequence operation: {0}")]
    OutOfSequence(String),
    #[error("candidate rejected: {0}")]
    CandidateRejected(String),
    #[error("transport already closed")]
    Closed,
    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),
}

/// Problems decoding or delivering relay messages
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("unknown relay event `{0}`")]
    UnknownEvent(String),
    #[error("malformed payload for relay event `{event}`: {source}")]
    MalformedPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors surfaced to the instruction that started or drove a call
#[derive(Debug, Error)]
pub enum CallError {
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaError),
    #[error("transport construction failed: {0}")]
    TransportConstruction(#[source] TransportError),
    #[error("descriptor installation failed in state {state:?}: {source}")]
    DescriptorInstallation {
        state: CallState,
        #[source]
        source: TransportError,
    },
    #[error("candidate application failed: {0}")]
    CandidateApplication(#[source] TransportError),
    #[error("a call is already in progress (state {0:?})")]
    CallInProgress(CallState),
    #[error("negotiation controller is no longer running")]
    ControllerGone,
}

pub type CallResult<T> = Result<T, CallError>;
