pub mod connection;
pub mod ice;
pub mod transport;
pub mod types;

pub use transport::{SessionTransport, TransportEvent, TransportEventSink, TransportFactory};
pub use types::{
    AnswerDescriptor, IceCandidate, IceServerConfig, OfferDescriptor, PeerState, RemoteTrack,
    SessionDescription, TaggedCandidate,
};
