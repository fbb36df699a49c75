use crate::logger::SignalEmitter;
use crate::peer::types::{IceCandidate, IceServerConfig, ServerKind};
use crate::utils::add_ice_url_scheme;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{configuration::RTCConfiguration, RTCPeerConnection},
};

// ========== CANDIDATES ==========

pub fn to_rtc_candidate(candidate: &IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate.clone(),
        sdp_mid: candidate.sdp_mid.clone(),
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment.clone(),
    }
}

pub fn from_rtc_candidate(candidate: &RTCIceCandidate) -> Option<IceCandidate> {
    match candidate.to_json() {
        Ok(init) => Some(IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }),
        Err(e) => {
            warn!("Failed to get candidate JSON: {:?}", e);
            None
        }
    }
}

/// The `typ` field of an SDP candidate line (`host`, `srflx`, `prflx`, `relay`)
pub fn candidate_type(candidate: &str) -> Option<&str> {
    let mut parts = candidate.split_whitespace();
    while let Some(part) = parts.next() {
        if part == "typ" {
            return parts.next();
        }
    }
    None
}

/// Whether `candidate` proves the given server kind actually works
pub fn candidate_matches(kind: ServerKind, candidate: &str) -> bool {
    match (kind, candidate_type(candidate)) {
        (ServerKind::Stun, Some("srflx")) => true,
        (ServerKind::Turn, Some("relay")) => true,
        _ => false,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateCounts {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateCounts {
    let mut counts = CandidateCounts::default();
    for candidate in candidates {
        match candidate_type(&candidate.candidate) {
            Some("host") => counts.host += 1,
            Some("srflx") => counts.srflx += 1,
            Some("relay") => counts.relay += 1,
            _ => {}
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        counts.host, counts.srflx, counts.relay
    );
    if counts.relay == 0 {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }
    counts
}

// ========== REACHABILITY PROBE ==========

/// How a probe ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTerminal {
    MatchingCandidate,
    GatheringComplete,
    TimedOut,
    SetupFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachabilityResult {
    pub reachable: bool,
    pub terminal: ProbeTerminal,
    pub server: String,
}

impl ReachabilityResult {
    fn new(server: &str, terminal: ProbeTerminal) -> Self {
        Self {
            reachable: terminal == ProbeTerminal::MatchingCandidate,
            terminal,
            server: server.to_owned(),
        }
    }
}

/// Lets exactly one of the timer and the candidate callback decide the outcome
#[derive(Debug)]
pub struct ProbeGate {
    resolved: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<ProbeTerminal>>>,
}

impl ProbeGate {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<ProbeTerminal>) {
        let (tx, rx) = oneshot::channel();
        let gate = Arc::new(Self {
            resolved: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        });
        (gate, rx)
    }

    /// Returns false if the probe was already resolved
    pub fn resolve(&self, terminal: ProbeTerminal) -> bool {
        if self.resolved.swap(true, Ordering::SeqCst) {
            return false;
        }
        let tx = self.tx.lock().ok().and_then(|mut slot| slot.take());
        if let Some(tx) = tx {
            let _ = tx.send(terminal);
        }
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }
}

/// Waits for the gate, resolving it as timed out when `limit` passes first
pub async fn await_resolution(
    gate: &ProbeGate,
    mut rx: oneshot::Receiver<ProbeTerminal>,
    limit: Duration,
) -> ProbeTerminal {
    match timeout(limit, &mut rx).await {
        Ok(Ok(terminal)) => terminal,
        Ok(Err(_)) => {
            gate.resolve(ProbeTerminal::GatheringComplete);
            ProbeTerminal::GatheringComplete
        }
        Err(_) => {
            if gate.resolve(ProbeTerminal::TimedOut) {
                ProbeTerminal::TimedOut
            } else {
                // колбэк успел ровно на дедлайне
                rx.try_recv().unwrap_or(ProbeTerminal::TimedOut)
            }
        }
    }
}

/// Checks whether `config` routes traffic by gathering candidates on a throwaway connection
pub async fn probe_server(config: &IceServerConfig, limit: Duration) -> ReachabilityResult {
    let url = add_ice_url_scheme(config);
    debug!("probe called for '{}' -> '{}'", config.url, url);

    if let Err(reason) = config.validate() {
        warn!("probe skipped, invalid server config: {reason}");
        return ReachabilityResult::new(&url, ProbeTerminal::SetupFailed);
    }

    let rtc_config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec![url.clone()],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        }],
        ..Default::default()
    };

    let api = APIBuilder::new().build();
    let pc = match api.new_peer_connection(rtc_config).await {
        Ok(pc) => pc,
        Err(e) => {
            warn!("Failed to create probe peer connection: {:?}", e);
            return ReachabilityResult::new(&url, ProbeTerminal::SetupFailed);
        }
    };

    let terminal = run_probe(&pc, config.kind, limit).await;
    if let Err(e) = pc.close().await {
        debug!("probe connection close failed: {:?}", e);
    }

    let result = ReachabilityResult::new(&url, terminal);
    info!(server = %url, reachable = result.reachable, terminal = ?terminal, "probe finished");
    result
}

async fn run_probe(pc: &RTCPeerConnection, kind: ServerKind, limit: Duration) -> ProbeTerminal {
    let (gate, rx) = ProbeGate::new();

    let cb_gate = gate.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let gate = cb_gate.clone();
        Box::pin(async move {
            match candidate {
                Some(c) => {
                    if let Some(c) = from_rtc_candidate(&c) {
                        debug!("probe candidate: {}", c.candidate);
                        if candidate_matches(kind, &c.candidate) {
                            gate.resolve(ProbeTerminal::MatchingCandidate);
                        }
                    }
                }
                None => {
                    gate.resolve(ProbeTerminal::GatheringComplete);
                }
            }
        })
    }));

    // Создаем data channel, иначе offer не запустит сбор кандидатов
    if let Err(e) = pc.create_data_channel("probe", None).await {
        warn!("Failed to create probe data channel: {:?}", e);
        return ProbeTerminal::SetupFailed;
    }
    match pc.create_offer(None).await {
        Ok(offer) => {
            if let Err(e) = pc.set_local_description(offer).await {
                warn!("Failed to set probe local description: {:?}", e);
                return ProbeTerminal::SetupFailed;
            }
        }
        Err(e) => {
            warn!("Failed to create probe offer: {:?}", e);
            return ProbeTerminal::SetupFailed;
        }
    }

    await_resolution(&gate, rx, limit).await
}

/// Runs a probe in the background and reports the result as a UI signal
pub fn spawn_probe(
    config: IceServerConfig,
    limit: Duration,
    signals: SignalEmitter,
) -> JoinHandle<ReachabilityResult> {
    tokio::spawn(async move {
        let result = probe_server(&config, limit).await;
        if !result.reachable {
            warn!(server = %result.server, terminal = ?result.terminal, "relay fallback not reachable");
        }
        signals.emit_reachability(result.clone());
        result
    })
}
