//! Uniform surface over the native media transport.
//!
//! The controller only talks to [`SessionTransport`]; callbacks raised by the
//! native connection are funnelled into a [`TransportEventSink`] so they are
//! handled on the controller task, in order, tagged with the session that
//! owns the transport.

use crate::error::TransportError;
use crate::media::LocalTrack;
use crate::peer::types::{IceCandidate, PeerState, RemoteTrack, SessionDescription, SignalingState};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Callback raised by a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    CandidateGenerated(IceCandidate),
    GatheringComplete,
    TrackReceived(RemoteTrack),
    StateChanged(PeerState),
}

/// Event plus the id of the session whose transport raised it
#[derive(Debug, Clone)]
pub struct SessionTransportEvent {
    pub session_id: u64,
    pub event: TransportEvent,
}

/// Handed to a transport at construction; delivers callbacks to the controller
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    session_id: u64,
    tx: mpsc::UnboundedSender<SessionTransportEvent>,
}

impl TransportEventSink {
    pub fn new(session_id: u64, tx: mpsc::UnboundedSender<SessionTransportEvent>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn emit(&self, event: TransportEvent) {
        if self
            .tx
            .send(SessionTransportEvent {
                session_id: self.session_id,
                event,
            })
            .is_err()
        {
            debug!(session = self.session_id, "transport event dropped: controller gone");
        }
    }
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    async fn add_track(&self, track: &LocalTrack) -> Result<(), TransportError>;

    async fn remove_track(&self, track: &LocalTrack) -> Result<(), TransportError>;

    async fn signaling_state(&self) -> SignalingState;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Builds one transport per session
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        events: TransportEventSink,
    ) -> Result<Arc<dyn SessionTransport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_tags_events_with_session_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TransportEventSink::new(7, tx);
        sink.emit(TransportEvent::StateChanged(PeerState::Connecting));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.session_id, 7);
        assert!(matches!(
            ev.event,
            TransportEvent::StateChanged(PeerState::Connecting)
        ));
    }

    #[test]
    fn sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = TransportEventSink::new(1, tx);
        sink.emit(TransportEvent::GatheringComplete);
    }
}
