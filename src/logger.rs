use crate::config::DEFAULT_LOG_FILTER;
use crate::peer::ice::ReachabilityResult;
use crate::peer::types::{IceCandidate, RemoteTrack};
use crate::session::EndReason;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use webrtc::peer_connection::RTCPeerConnection;

/// Installs the global tracing subscriber. Safe to call more than once.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Print an ICE candidate as it trickles in
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index, cand.username_fragment
    );
}

/// Quick getStats snapshot of the nominated pair
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                info!(
                    "STATS {moment}: {}:{}  type: {:?}  bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.stats_type,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}

/// Session lifecycle notifications for the UI layer
#[derive(Debug, Clone)]
pub enum CallSignal {
    MediaAcquisitionFailed(String),
    Connecting,
    Connected,
    Disconnected,
    ConnectionFailed,
    RemoteTrack(RemoteTrack),
    Failed(String),
    Ended(EndReason),
    RelayReachability(ReachabilityResult),
}

/// Logs every UI signal and forwards it to whoever renders the call
#[derive(Debug, Clone)]
pub struct SignalEmitter {
    tx: mpsc::UnboundedSender<CallSignal>,
}

impl SignalEmitter {
    pub fn new(tx: mpsc::UnboundedSender<CallSignal>) -> Self {
        Self { tx }
    }

    /// Emitter plus the receiving end for the UI
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CallSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn emit_state(&self, signal: CallSignal) {
        debug!(?signal, "emitting UI signal");
        if self.tx.send(signal).is_err() {
            debug!("UI signal dropped: no listener");
        }
    }

    pub fn emit_media_failed(&self, reason: &str) {
        warn!("camera/microphone unavailable: {reason}");
        self.emit_state(CallSignal::MediaAcquisitionFailed(reason.to_owned()));
    }

    pub fn emit_connecting(&self) {
        info!("transport connecting");
        self.emit_state(CallSignal::Connecting);
    }

    pub fn emit_connected(&self) {
        info!("transport connected");
        self.emit_state(CallSignal::Connected);
    }

    pub fn emit_disconnected(&self) {
        warn!("transport disconnected");
        self.emit_state(CallSignal::Disconnected);
    }

    pub fn emit_connection_failed(&self) {
        warn!("transport did not recover");
        self.emit_state(CallSignal::ConnectionFailed);
    }

    pub fn emit_remote_track(&self, track: RemoteTrack) {
        info!(id = %track.id, kind = ?track.kind, "remote track received");
        self.emit_state(CallSignal::RemoteTrack(track));
    }

    pub fn emit_failed(&self, reason: &str) {
        warn!("call failed: {reason}");
        self.emit_state(CallSignal::Failed(reason.to_owned()));
    }

    pub fn emit_ended(&self, reason: EndReason) {
        info!(?reason, "call ended");
        self.emit_state(CallSignal::Ended(reason));
    }

    pub fn emit_reachability(&self, result: ReachabilityResult) {
        self.emit_state(CallSignal::RelayReachability(result));
    }
}
