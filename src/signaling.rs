//! Message pipe to the signaling relay.
//!
//! Inbound messages are decoded through a single static [`EventTable`] into
//! [`InboundEvent`]s; outbound [`OutboundEvent`]s are encoded into named
//! [`RelayMessage`]s and handed to a [`RelayChannel`] without waiting for
//! acknowledgement.

use crate::error::RelayError;
use crate::peer::types::{
    AnswerDescriptor, IceCandidate, OfferDescriptor, SessionDescription, TaggedCandidate,
};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Named event as carried by the relay
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RelayMessage {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl RelayMessage {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

// ========== INBOUND ==========

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Relay picked this client to originate the call
    CreateOffer,
    Offer(OfferDescriptor),
    AddAnswer(SessionDescription),
    /// Candidates the relay held for the offerer
    OffererCandidates(Vec<IceCandidate>),
    RemoteCandidate(IceCandidate),
    /// Remote side hung up
    EndCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
    CreateOffer,
    Offer,
    AddAnswer,
    OffererCandidates,
    RemoteCandidate,
    EndCall,
}

impl InboundKind {
    pub const ALL: [InboundKind; 6] = [
        InboundKind::CreateOffer,
        InboundKind::Offer,
        InboundKind::AddAnswer,
        InboundKind::OffererCandidates,
        InboundKind::RemoteCandidate,
        InboundKind::EndCall,
    ];
}

/// Every event name the relay may deliver, with the kind it decodes to
const INBOUND_ROUTES: [(&str, InboundKind); 7] = [
    ("create_offer", InboundKind::CreateOffer),
    ("offer", InboundKind::Offer),
    ("add_answer", InboundKind::AddAnswer),
    ("offerer_ice_candidates", InboundKind::OffererCandidates),
    ("add_ice_candidates_from_other_peer", InboundKind::RemoteCandidate),
    ("add_ice_candidate_from_other_peer", InboundKind::RemoteCandidate),
    ("end_call", InboundKind::EndCall),
];

#[derive(Deserialize)]
struct OfferPayload {
    offer_obj: OfferDescriptor,
}

#[derive(Deserialize)]
struct AnswerPayload {
    answer: SessionDescription,
}

#[derive(Deserialize)]
struct CandidatesPayload {
    candidates: Vec<IceCandidate>,
}

#[derive(Deserialize)]
struct CandidatePayload {
    candidate: IceCandidate,
}

/// Event-name to handler-kind table
#[derive(Debug)]
pub struct EventTable {
    routes: HashMap<&'static str, InboundKind>,
}

pub static EVENT_TABLE: Lazy<EventTable> = Lazy::new(EventTable::build);

impl EventTable {
    fn build() -> Self {
        let table = Self {
            routes: INBOUND_ROUTES.iter().copied().collect(),
        };
        debug!(routes = table.routes.len(), "relay event table built");
        table
    }

    /// Every inbound kind must be reachable from at least one name,
    /// and every name must map to exactly one kind
    pub fn validate(&self) -> Result<(), String> {
        if self.routes.len() != INBOUND_ROUTES.len() {
            return Err("duplicate inbound event name".into());
        }
        for kind in InboundKind::ALL {
            if !self.routes.values().any(|k| *k == kind) {
                return Err(format!("no event name routes to {:?}", kind));
            }
        }
        Ok(())
    }

    pub fn kind_of(&self, event: &str) -> Option<InboundKind> {
        self.routes.get(event).copied()
    }

    pub fn decode(&self, msg: &RelayMessage) -> Result<InboundEvent, RelayError> {
        let kind = self
            .kind_of(&msg.event)
            .ok_or_else(|| RelayError::UnknownEvent(msg.event.clone()))?;
        trace!(event = %msg.event, ?kind, "decoding relay message");

        let event = match kind {
            InboundKind::CreateOffer => InboundEvent::CreateOffer,
            InboundKind::EndCall => InboundEvent::EndCall,
            InboundKind::Offer => {
                InboundEvent::Offer(parse::<OfferPayload>(msg)?.offer_obj)
            }
            InboundKind::AddAnswer => {
                InboundEvent::AddAnswer(parse::<AnswerPayload>(msg)?.answer)
            }
            InboundKind::OffererCandidates => {
                InboundEvent::OffererCandidates(parse::<CandidatesPayload>(msg)?.candidates)
            }
            InboundKind::RemoteCandidate => {
                InboundEvent::RemoteCandidate(parse::<CandidatePayload>(msg)?.candidate)
            }
        };
        Ok(event)
    }
}

fn parse<T: DeserializeOwned>(msg: &RelayMessage) -> Result<T, RelayError> {
    serde_json::from_value(msg.payload.clone()).map_err(|source| RelayError::MalformedPayload {
        event: msg.event.clone(),
        source,
    })
}

// ========== OUTBOUND ==========

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    NewOffer(SessionDescription),
    AnswerToOfferer(AnswerDescriptor),
    /// Ask the relay to flush candidates it holds for this offerer
    RequestOffererCandidates { offerer: String },
    SendCandidate(TaggedCandidate),
    PeerConnected,
    PeerDisconnected,
    ClearOfferObject,
    EndCall,
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::NewOffer(_) => "new_offer",
            OutboundEvent::AnswerToOfferer(_) => "set_remote_description_of_offerer",
            OutboundEvent::RequestOffererCandidates { .. } => {
                "add_offerer_ice_candidates_to_answerer"
            }
            OutboundEvent::SendCandidate(_) => "send_ice_candidates_to_signalling_server",
            OutboundEvent::PeerConnected => "peer_connection_connected",
            OutboundEvent::PeerDisconnected => "peer_connection_disconnected",
            OutboundEvent::ClearOfferObject => "clear_offer_object",
            OutboundEvent::EndCall => "end_call",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            OutboundEvent::NewOffer(offer) => json!({ "offer": offer }),
            OutboundEvent::AnswerToOfferer(answer) => json!(answer),
            OutboundEvent::RequestOffererCandidates { offerer } => json!({ "offerer": offerer }),
            OutboundEvent::SendCandidate(tagged) => json!(tagged),
            _ => json!({}),
        }
    }

    pub fn to_message(&self) -> RelayMessage {
        RelayMessage::new(self.name(), self.payload())
    }
}

/// Outbound side of the relay. Fire-and-forget.
pub trait RelayChannel: Send + Sync {
    fn send(&self, event: OutboundEvent);
}

/// Relay channel over in-process queues; the host bridges them to the real relay
#[derive(Debug, Clone)]
pub struct ChannelRelay {
    tx: mpsc::UnboundedSender<RelayMessage>,
}

impl ChannelRelay {
    pub fn new(tx: mpsc::UnboundedSender<RelayMessage>) -> Self {
        Self { tx }
    }
}

impl RelayChannel for ChannelRelay {
    fn send(&self, event: OutboundEvent) {
        let msg = event.to_message();
        debug!(event = %msg.event, "relay send");
        if self.tx.send(msg).is_err() {
            debug!("relay send dropped: relay channel closed");
        }
    }
}

/// Controller-side ends of an in-process relay link
#[derive(Debug)]
pub struct RelayLink {
    pub relay: ChannelRelay,
    pub inbound: mpsc::UnboundedReceiver<RelayMessage>,
}

/// Host-side ends: read what the controller sends, push what the relay delivers
#[derive(Debug)]
pub struct RelayEndpoint {
    pub outbound: mpsc::UnboundedReceiver<RelayMessage>,
    pub inbound: mpsc::UnboundedSender<RelayMessage>,
}

pub fn channel_relay() -> (RelayLink, RelayEndpoint) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    (
        RelayLink {
            relay: ChannelRelay::new(out_tx),
            inbound: in_rx,
        },
        RelayEndpoint {
            outbound: out_rx,
            inbound: in_tx,
        },
    )
}
