#![allow(dead_code)]

use async_trait::async_trait;
use peercall::media::{CaptureConstraints, LocalTrack, MediaHandle, MediaProvider};
use peercall::peer::types::{SdpKind, SignalingState, TrackKind};
use peercall::peer::{
    IceCandidate, PeerState, SessionDescription, SessionTransport, TransportEvent,
    TransportEventSink, TransportFactory,
};
use peercall::signaling::RelayMessage;
use peercall::{
    CallConfig, CallSignal, ChannelRelay, MediaError, NegotiationController, SignalEmitter,
    TransportError,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// ========== MEDIA ==========

#[derive(Default)]
pub struct MockMedia {
    pub deny: bool,
    pub acquisitions: AtomicUsize,
    pub releases: Arc<AtomicUsize>,
}

impl MockMedia {
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl MediaProvider for MockMedia {
    async fn acquire(&self, constraints: CaptureConstraints) -> Result<MediaHandle, MediaError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(MediaError::PermissionDenied);
        }
        let tracks = vec![
            LocalTrack::new(TrackKind::Audio, "audio", "mock-stream"),
            LocalTrack::new(TrackKind::Video, "video", "mock-stream"),
        ];
        let releases = self.releases.clone();
        Ok(
            MediaHandle::new("mock-stream".into(), tracks, constraints).with_release_hook(move || {
                releases.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }
}

// ========== TRANSPORT ==========

#[derive(Default)]
struct MockState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidate>,
    tracks: Vec<String>,
    connected: bool,
    closed: bool,
}

/// Counters shared by every transport a factory builds
#[derive(Default)]
pub struct TransportStats {
    pub created: AtomicUsize,
    pub closes: AtomicUsize,
    pub track_removals: AtomicUsize,
    /// candidates offered before a remote description existed
    pub early_candidates: AtomicUsize,
    pub rejected_candidates: AtomicUsize,
}

/// Transport that "connects" once both descriptions and one remote candidate are in place
pub struct MockTransport {
    label: String,
    sink: TransportEventSink,
    state: Mutex<MockState>,
    stats: Arc<TransportStats>,
}

impl MockTransport {
    pub fn emit_state(&self, state: PeerState) {
        self.sink.emit(TransportEvent::StateChanged(state));
    }

    pub fn applied(&self) -> Vec<IceCandidate> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn tracks(&self) -> Vec<String> {
        self.state.lock().unwrap().tracks.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn maybe_connect(&self, st: &mut MockState) {
        if !st.connected && st.local.is_some() && st.remote.is_some() && !st.applied.is_empty() {
            st.connected = true;
            self.sink.emit(TransportEvent::StateChanged(PeerState::Connecting));
            self.sink.emit(TransportEvent::StateChanged(PeerState::Connected));
        }
    }
}

pub fn host_candidate(label: &str, i: usize) -> IceCandidate {
    IceCandidate::new(format!(
        "candidate:{i} 1 udp 2130706431 10.0.0.{i} 500{i} typ host ufrag {label}"
    ))
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        if self.state.lock().unwrap().closed {
            return Err(TransportError::Closed);
        }
        Ok(SessionDescription::offer(format!("v=0 offer {}", self.label)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let st = self.state.lock().unwrap();
        match &st.remote {
            Some(desc) if desc.kind == SdpKind::Offer => Ok(SessionDescription::answer(format!(
                "v=0 answer {}",
                self.label
            ))),
            _ => Err(TransportError::OutOfSequence("answer without remote offer".into())),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let mut st = self.state.lock().unwrap();
        if st.closed {
            return Err(TransportError::Closed);
        }
        st.local = Some(desc);
        for i in 1..=3 {
            self.sink
                .emit(TransportEvent::CandidateGenerated(host_candidate(&self.label, i)));
        }
        self.sink.emit(TransportEvent::GatheringComplete);
        self.maybe_connect(&mut st);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        let mut st = self.state.lock().unwrap();
        if desc.sdp.contains("malformed") {
            return Err(TransportError::InvalidDescription(desc.sdp));
        }
        if desc.kind == SdpKind::Answer
            && st.local.as_ref().map(|l| l.kind) != Some(SdpKind::Offer)
        {
            return Err(TransportError::OutOfSequence("answer without local offer".into()));
        }
        st.remote = Some(desc);
        self.maybe_connect(&mut st);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let mut st = self.state.lock().unwrap();
        if st.remote.is_none() {
            self.stats.early_candidates.fetch_add(1, Ordering::SeqCst);
            return Err(TransportError::OutOfSequence("no remote description".into()));
        }
        if candidate.candidate.contains("bogus") {
            self.stats.rejected_candidates.fetch_add(1, Ordering::SeqCst);
            return Err(TransportError::CandidateRejected(candidate.candidate));
        }
        st.applied.push(candidate);
        self.maybe_connect(&mut st);
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), TransportError> {
        self.state.lock().unwrap().tracks.push(track.id().to_owned());
        Ok(())
    }

    async fn remove_track(&self, track: &LocalTrack) -> Result<(), TransportError> {
        self.stats.track_removals.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().tracks.retain(|t| t != track.id());
        Ok(())
    }

    async fn signaling_state(&self) -> SignalingState {
        let st = self.state.lock().unwrap();
        match (&st.local, &st.remote) {
            (Some(_), Some(_)) => SignalingState::Stable,
            (Some(_), None) => SignalingState::HaveLocalOffer,
            (None, Some(_)) => SignalingState::HaveRemoteOffer,
            (None, None) => SignalingState::Stable,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

#[derive(Default)]
pub struct MockFactory {
    pub label: String,
    pub fail: bool,
    pub stats: Arc<TransportStats>,
    pub transports: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockFactory {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            ..Default::default()
        }
    }

    pub fn failing(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            fail: true,
            ..Default::default()
        }
    }

    pub fn last(&self) -> Arc<MockTransport> {
        self.transports.lock().unwrap().last().cloned().unwrap()
    }

    pub fn created(&self) -> usize {
        self.stats.created.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.stats.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn create(
        &self,
        events: TransportEventSink,
    ) -> Result<Arc<dyn SessionTransport>, TransportError> {
        if self.fail {
            return Err(TransportError::Unavailable("no media transport".into()));
        }
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        let transport = Arc::new(MockTransport {
            label: self.label.clone(),
            sink: events,
            state: Mutex::new(MockState::default()),
            stats: self.stats.clone(),
        });
        self.transports.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

// ========== PEER ==========

/// One client: controller plus its mocks and the ends of its channels
pub struct Peer {
    pub name: String,
    pub controller: NegotiationController,
    pub outbound: mpsc::UnboundedReceiver<RelayMessage>,
    pub signals: mpsc::UnboundedReceiver<CallSignal>,
    pub media: Arc<MockMedia>,
    pub factory: Arc<MockFactory>,
}

pub fn config(name: &str) -> CallConfig {
    CallConfig {
        participant_id: name.to_owned(),
        ice_servers: vec![],
        ..CallConfig::default()
    }
}

impl Peer {
    pub fn new(name: &str) -> Self {
        Self::with(name, MockMedia::default(), MockFactory::new(name), config(name))
    }

    pub fn with(name: &str, media: MockMedia, factory: MockFactory, config: CallConfig) -> Self {
        let (out_tx, outbound) = mpsc::unbounded_channel();
        let (signals_tx, signals) = SignalEmitter::channel();
        let media = Arc::new(media);
        let factory = Arc::new(factory);
        let controller = NegotiationController::new(
            config,
            Arc::new(ChannelRelay::new(out_tx)),
            media.clone(),
            factory.clone(),
            signals_tx,
        );
        Self {
            name: name.to_owned(),
            controller,
            outbound,
            signals,
            media,
            factory,
        }
    }

    pub fn sent(&mut self) -> Vec<RelayMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.outbound.try_recv() {
            out.push(msg);
        }
        out
    }

    pub fn drain_signals(&mut self) -> Vec<CallSignal> {
        let mut out = Vec::new();
        while let Ok(s) = self.signals.try_recv() {
            out.push(s);
        }
        out
    }

    pub async fn deliver(&mut self, event: &str, payload: Value) {
        self.controller
            .handle_relay_message(RelayMessage::new(event, payload))
            .await;
    }
}

pub fn names(msgs: &[RelayMessage]) -> Vec<&str> {
    msgs.iter().map(|m| m.event.as_str()).collect()
}

// ========== FAKE RELAY ==========

pub const OFFERER: usize = 0;
pub const ANSWERER: usize = 1;

/// Signaling relay for two clients. Queues deliveries per (recipient, event name)
/// so a test can pick any cross-name order while each name stays FIFO.
#[derive(Default)]
pub struct FakeRelay {
    queues: BTreeMap<(usize, String), VecDeque<Value>>,
    held_offerer_candidates: Vec<Value>,
    answered: bool,
    pub records: Vec<(usize, String)>,
}

impl FakeRelay {
    /// Takes what client `from` sent and queues the resulting deliveries
    pub fn route(&mut self, from: usize, messages: Vec<RelayMessage>, offerer_id: &str) {
        let to = 1 - from;
        for msg in messages {
            self.records.push((from, msg.event.clone()));
            match msg.event.as_str() {
                "new_offer" => self.push(
                    to,
                    "offer",
                    json!({"offer_obj": {"offer": msg.payload["offer"], "offerer": offerer_id}}),
                ),
                "set_remote_description_of_offerer" => {
                    self.answered = true;
                    self.push(to, "add_answer", json!({"answer": msg.payload["answer"]}));
                }
                "add_offerer_ice_candidates_to_answerer" => {
                    let held = std::mem::take(&mut self.held_offerer_candidates);
                    self.push(from, "offerer_ice_candidates", json!({ "candidates": held }));
                }
                "send_ice_candidates_to_signalling_server" => {
                    let candidate = msg.payload["ice_candidate"].clone();
                    let from_offerer = msg.payload["did_i_offer"] == json!(true);
                    if from_offerer && !self.answered {
                        self.held_offerer_candidates.push(candidate);
                    } else {
                        self.push(
                            to,
                            "add_ice_candidates_from_other_peer",
                            json!({ "candidate": candidate }),
                        );
                    }
                }
                "end_call" => self.push(to, "end_call", json!({})),
                _ => {}
            }
        }
    }

    fn push(&mut self, to: usize, event: &str, payload: Value) {
        self.queues
            .entry((to, event.to_owned()))
            .or_default()
            .push_back(payload);
    }

    pub fn ready(&self) -> Vec<(usize, String)> {
        self.queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn pop(&mut self, key: &(usize, String)) -> Option<Value> {
        self.queues.get_mut(key).and_then(|q| q.pop_front())
    }

    pub fn is_idle(&self) -> bool {
        self.queues.values().all(|q| q.is_empty())
    }
}

/// Routes traffic between the peers until nothing is left to deliver.
/// `choose` picks which ready queue is served next.
pub async fn pump(peers: &mut [Peer; 2], relay: &mut FakeRelay, mut choose: impl FnMut(usize) -> usize) {
    let offerer_id = peers[OFFERER].name.clone();
    loop {
        for (i, peer) in peers.iter_mut().enumerate() {
            peer.controller.process_transport_events().await;
            let sent = peer.sent();
            relay.route(i, sent, &offerer_id);
        }
        let ready = relay.ready();
        if ready.is_empty() {
            break;
        }
        let key = ready[choose(ready.len()) % ready.len()].clone();
        if let Some(payload) = relay.pop(&key) {
            peers[key.0].deliver(&key.1, payload).await;
        }
    }
}
