//! Two-party audio/video call negotiation.
//!
//! A [`NegotiationController`] drives the offer/answer handshake with the
//! far side through a signaling relay, trickles ICE candidates both ways and
//! hands media off to a direct peer connection.

pub mod config;
pub mod controller;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::CallConfig;
pub use controller::{CallHandle, NegotiationController};
pub use error::{CallError, CallResult, ConfigError, MediaError, RelayError, TransportError};
pub use logger::{init_logging, CallSignal, SignalEmitter};
pub use media::{CaptureConstraints, MediaHandle, MediaProvider, SampleTrackProvider};
pub use peer::connection::WebRtcTransportFactory;
pub use peer::ice::{probe_server, ReachabilityResult};
pub use session::{CallState, EndReason, FailureKind, Role, Session};
pub use signaling::{channel_relay, ChannelRelay, RelayChannel, RelayMessage};
