use super::{Command, NegotiationController};
use crate::error::{CallError, CallResult, TransportError};
use crate::media::LocalTrack;
use crate::peer::ice::analyze_candidates;
use crate::peer::transport::{
    SessionTransport, SessionTransportEvent, TransportEvent, TransportEventSink,
};
use crate::peer::types::{IceCandidate, PeerState, TaggedCandidate};
use crate::session::{CallState, EndReason, FailureKind, Role, Session};
use crate::signaling::OutboundEvent;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

impl NegotiationController {
    // ========== STARTING ==========

    /// Idle → AcquiringMedia → AwaitingRole
    pub async fn join(&mut self) -> CallResult<()> {
        self.begin_session()?;
        self.acquire_media().await
    }

    /// Joins if needed, then takes the offerer path
    pub async fn start_call(&mut self) -> CallResult<()> {
        if self.session.state() != CallState::AwaitingRole {
            self.join().await?;
        }
        self.create_offer().await
    }

    /// Rejects a second call while one is in flight; replaces a finished session
    fn begin_session(&mut self) -> CallResult<()> {
        let state = self.session.state();
        if state.is_active() {
            warn!(?state, "call instruction ignored: a call is already in progress");
            return Err(CallError::CallInProgress(state));
        }
        if state.is_terminal() {
            self.next_session_id += 1;
            self.session = Session::new(self.next_session_id);
        }
        info!(session = self.session.id(), "starting session");
        Ok(())
    }

    async fn acquire_media(&mut self) -> CallResult<()> {
        self.session.set_state(CallState::AcquiringMedia);
        match self.media.acquire(self.config.constraints).await {
            Ok(handle) => {
                self.session.media = Some(handle);
                self.session.set_state(CallState::AwaitingRole);
                Ok(())
            }
            Err(e) => {
                self.signals.emit_media_failed(&e.to_string());
                self.fail(FailureKind::MediaAcquisition, &e.to_string()).await;
                Err(CallError::MediaAcquisition(e))
            }
        }
    }

    /// AwaitingRole → Offering: offer is installed locally before it is sent
    async fn create_offer(&mut self) -> CallResult<()> {
        let transport = self.build_transport().await?;
        self.session.set_state(CallState::Offering);

        let offer = match transport.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.fail_descriptor(e).await),
        };
        if let Err(e) = transport.set_local_description(offer.clone()).await {
            return Err(self.fail_descriptor(e).await);
        }

        self.session.fix_role(Role::Offerer);
        self.relay.send(OutboundEvent::NewOffer(offer));
        self.flush_pending_local_candidates();
        info!(session = self.session.id(), "offer sent");
        Ok(())
    }

    /// Creates the session transport and attaches the local tracks
    pub(super) async fn build_transport(&mut self) -> CallResult<Arc<dyn SessionTransport>> {
        let sink = TransportEventSink::new(self.session.id(), self.transport_tx.clone());
        let transport = match self.factory.create(sink).await {
            Ok(transport) => transport,
            Err(e) => {
                self.fail(FailureKind::TransportConstruction, &e.to_string())
                    .await;
                return Err(CallError::TransportConstruction(e));
            }
        };
        self.session.transport = Some(transport.clone());

        for track in self.local_tracks() {
            if let Err(e) = transport.add_track(&track).await {
                self.fail(FailureKind::TransportConstruction, &e.to_string())
                    .await;
                return Err(CallError::TransportConstruction(e));
            }
        }
        debug!(session = self.session.id(), "transport ready");
        Ok(transport)
    }

    fn local_tracks(&self) -> Vec<LocalTrack> {
        self.session
            .media
            .as_ref()
            .map(|m| m.tracks().to_vec())
            .unwrap_or_default()
    }

    // ========== ENDING ==========

    /// Explicit hang-up. Safe from any state; a second call does nothing.
    pub async fn end_call(&mut self) {
        self.end_session(EndReason::LocalHangUp, true).await;
    }

    pub(super) async fn end_session(&mut self, reason: EndReason, notify_relay: bool) {
        let state = self.session.state();
        if state.is_terminal() {
            debug!(?state, ?reason, "end ignored: session already over");
            return;
        }

        let notify_relay = notify_relay && self.session.peer_engaged();
        self.release_resources().await;
        self.session.set_state(CallState::Ended);
        if notify_relay {
            self.relay.send(OutboundEvent::EndCall);
        }
        if let Some(at) = self.session.connected_at() {
            info!(
                session = self.session.id(),
                seconds = (Utc::now() - at).num_seconds(),
                "call duration"
            );
        }
        self.signals.emit_ended(reason);
    }

    /// Moves to the absorbing failure state; cleanup is unconditional
    pub(super) async fn fail(&mut self, kind: FailureKind, reason: &str) {
        let state = self.session.state();
        if state.is_terminal() {
            return;
        }
        error!(session = self.session.id(), ?state, ?kind, "call failed: {reason}");

        let notify_relay = self.session.peer_engaged();
        self.release_resources().await;
        self.session.set_state(CallState::Failed(kind));
        if notify_relay {
            self.relay.send(OutboundEvent::EndCall);
        }
        self.signals.emit_failed(reason);
    }

    pub(super) async fn fail_descriptor(&mut self, source: TransportError) -> CallError {
        let state = self.session.state();
        error!(?state, "descriptor installation failed: {source}");
        self.fail(FailureKind::DescriptorInstallation, &source.to_string())
            .await;
        CallError::DescriptorInstallation { state, source }
    }

    /// Stops tracks, closes the transport, clears buffers. Each resource is taken, so it runs once.
    async fn release_resources(&mut self) {
        if let Some(task) = self.session.grace_task.take() {
            task.abort();
        }

        let tracks = self.local_tracks();
        if let Some(transport) = self.session.transport.take() {
            for track in &tracks {
                if let Err(e) = transport.remove_track(track).await {
                    debug!(track = track.id(), "remove_track failed: {e}");
                }
            }
            if let Err(e) = transport.close().await {
                warn!("transport close failed: {e}");
            }
        }
        if let Some(media) = self.session.media.take() {
            media.stop();
        }

        self.session.remote_candidate_buffer.clear();
        self.session.pending_local_candidates.clear();
        self.session.remote_description_installed = false;
    }

    // ========== TRANSPORT CALLBACKS ==========

    pub async fn handle_transport_event(&mut self, ev: SessionTransportEvent) {
        if ev.session_id != self.session.id() || self.session.state().is_terminal() {
            debug!(
                event_session = ev.session_id,
                session = self.session.id(),
                "stale transport event ignored"
            );
            return;
        }

        match ev.event {
            TransportEvent::CandidateGenerated(candidate) => {
                self.forward_local_candidate(candidate)
            }
            TransportEvent::GatheringComplete => {
                debug!("local ICE gathering complete");
                analyze_candidates(self.session.sent_candidates());
            }
            TransportEvent::TrackReceived(track) => {
                self.session.remote_tracks.push(track.clone());
                self.signals.emit_remote_track(track);
            }
            TransportEvent::StateChanged(state) => self.on_peer_state(state).await,
        }
    }

    /// Trickles the candidate at once, unless no role exists yet to tag it with
    fn forward_local_candidate(&mut self, candidate: IceCandidate) {
        match self.session.role() {
            Some(role) => self.send_local_candidate(role, candidate),
            None => self.session.pending_local_candidates.push(candidate),
        }
    }

    pub(super) fn flush_pending_local_candidates(&mut self) {
        let Some(role) = self.session.role() else {
            return;
        };
        for candidate in std::mem::take(&mut self.session.pending_local_candidates) {
            self.send_local_candidate(role, candidate);
        }
    }

    fn send_local_candidate(&mut self, role: Role, candidate: IceCandidate) {
        self.session.sent_candidates.push(candidate.clone());
        self.relay.send(OutboundEvent::SendCandidate(TaggedCandidate {
            did_i_offer: role == Role::Offerer,
            ice_candidate: candidate,
        }));
    }

    async fn on_peer_state(&mut self, peer: PeerState) {
        let state = self.session.state();
        match peer {
            PeerState::New => {}
            PeerState::Connecting => self.signals.emit_connecting(),
            PeerState::Connected => match state {
                CallState::DescriptorExchanged | CallState::Disconnected => {
                    if let Some(task) = self.session.grace_task.take() {
                        task.abort();
                    }
                    self.session.set_state(CallState::Connected);
                    self.relay.send(OutboundEvent::PeerConnected);
                    self.signals.emit_connected();
                }
                CallState::Connected => {}
                other => warn!(state = ?other, "transport connected before descriptors were exchanged"),
            },
            PeerState::Disconnected => {
                if state == CallState::Connected {
                    self.session.set_state(CallState::Disconnected);
                    self.relay.send(OutboundEvent::PeerDisconnected);
                    self.signals.emit_disconnected();
                    self.start_grace_timer();
                } else {
                    debug!(?state, "disconnected reported outside a connected call");
                }
            }
            PeerState::Failed | PeerState::Closed => {
                warn!(?peer, ?state, "transport terminated");
                if matches!(state, CallState::Connected | CallState::Disconnected) {
                    self.relay.send(OutboundEvent::PeerDisconnected);
                    self.signals.emit_disconnected();
                }
                self.end_session(EndReason::TransportTerminated, false).await;
            }
        }
    }

    fn start_grace_timer(&mut self) {
        let Some(grace) = self.config.disconnect_grace() else {
            return;
        };
        if self.session.grace_task.is_some() {
            return;
        }
        debug!(?grace, "waiting for transport to recover");
        let tx = self.commands_tx.clone();
        let session_id = self.session.id();
        self.session.grace_task = Some(tokio::spawn(async move {
            sleep(grace).await;
            let _ = tx.send(Command::DisconnectGraceElapsed { session_id });
        }));
    }

    pub(super) async fn on_grace_elapsed(&mut self, session_id: u64) {
        if session_id != self.session.id() || self.session.state() != CallState::Disconnected {
            return;
        }
        self.session.grace_task = None;
        self.signals.emit_connection_failed();
        self.end_session(EndReason::DisconnectTimeout, true).await;
    }
}
