use super::NegotiationController;
use crate::error::{CallError, CallResult};
use crate::peer::transport::SessionTransport;
use crate::peer::types::{AnswerDescriptor, IceCandidate, OfferDescriptor, SessionDescription, SignalingState};
use crate::session::{CallState, EndReason, Role};
use crate::signaling::{InboundEvent, OutboundEvent};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl NegotiationController {
    /// Applies one decoded relay event
    pub async fn handle_inbound(&mut self, event: InboundEvent) -> CallResult<()> {
        match event {
            InboundEvent::CreateOffer => self.start_call().await,
            InboundEvent::Offer(offer) => self.accept_offer(offer).await,
            InboundEvent::AddAnswer(answer) => self.accept_answer(answer).await,
            InboundEvent::OffererCandidates(candidates) => {
                debug!(count = candidates.len(), "offerer candidates flushed by relay");
                for candidate in candidates {
                    self.receive_remote_candidate(candidate).await;
                }
                Ok(())
            }
            InboundEvent::RemoteCandidate(candidate) => {
                self.receive_remote_candidate(candidate).await;
                Ok(())
            }
            InboundEvent::EndCall => {
                info!("remote side hung up");
                self.end_session(EndReason::RemoteHangUp, false).await;
                Ok(())
            }
        }
    }

    /// AwaitingRole → Answering → DescriptorExchanged
    async fn accept_offer(&mut self, offer: OfferDescriptor) -> CallResult<()> {
        let state = self.session.state();
        match state {
            CallState::Idle | CallState::AwaitingRole => {}
            state if state.is_terminal() => {
                info!(?state, offerer = %offer.offerer, "offer ignored: session is over");
                return Ok(());
            }
            state => {
                // role is already fixed, or this is a redelivery
                warn!(?state, offerer = %offer.offerer, "offer ignored");
                return Err(CallError::CallInProgress(state));
            }
        }

        // the offerer waits on us from here; any failure below must reach it
        self.session.remote_offerer = Some(offer.offerer.clone());
        if state == CallState::Idle {
            self.join().await?;
        }

        let transport = self.build_transport().await?;
        self.session.set_state(CallState::Answering);

        if let Err(e) = transport.set_remote_description(offer.offer).await {
            return Err(self.fail_descriptor(e).await);
        }
        self.session.remote_description_installed = true;
        self.drain_remote_candidates(&transport).await;

        let answer = match transport.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail_descriptor(e).await),
        };
        if let Err(e) = transport.set_local_description(answer.clone()).await {
            return Err(self.fail_descriptor(e).await);
        }

        self.session.fix_role(Role::Answerer);
        self.relay.send(OutboundEvent::AnswerToOfferer(AnswerDescriptor {
            answer,
            offerer: offer.offerer.clone(),
        }));
        self.relay.send(OutboundEvent::RequestOffererCandidates {
            offerer: offer.offerer,
        });
        self.flush_pending_local_candidates();
        self.session.set_state(CallState::DescriptorExchanged);
        info!(session = self.session.id(), "answer sent");
        Ok(())
    }

    /// Offering → DescriptorExchanged. Answers in any other state are dropped.
    async fn accept_answer(&mut self, answer: SessionDescription) -> CallResult<()> {
        let state = self.session.state();
        let transport = match (state, self.session.transport.clone()) {
            (CallState::Offering, Some(transport)) => transport,
            _ => {
                info!(?state, "answer ignored: no offer awaiting one");
                return Ok(());
            }
        };

        if let Err(e) = transport.set_remote_description(answer).await {
            return Err(self.fail_descriptor(e).await);
        }
        self.session.remote_description_installed = true;
        self.drain_remote_candidates(&transport).await;
        self.session.set_state(CallState::DescriptorExchanged);

        if transport.signaling_state().await == SignalingState::Stable {
            self.relay.send(OutboundEvent::ClearOfferObject);
        }
        info!(session = self.session.id(), "answer installed");
        Ok(())
    }

    /// Applies the candidate now if a remote description exists, else buffers it
    async fn receive_remote_candidate(&mut self, candidate: IceCandidate) {
        let state = self.session.state();
        if state.is_terminal() {
            debug!(?state, "candidate ignored: session is over");
            return;
        }
        if self.session.has_remote_candidate(&candidate) {
            debug!(candidate = %candidate.candidate, "duplicate remote candidate dropped");
            return;
        }

        match (self.session.remote_description_installed, self.session.transport.clone()) {
            (true, Some(transport)) => self.apply_remote_candidate(&transport, candidate).await,
            _ => {
                self.session.remote_candidate_buffer.push(candidate);
                debug!(
                    buffered = self.session.remote_candidate_buffer.len(),
                    "remote description not set yet, queuing candidate"
                );
            }
        }
    }

    /// Applies buffered candidates in arrival order and empties the buffer
    async fn drain_remote_candidates(&mut self, transport: &Arc<dyn SessionTransport>) {
        let pending = std::mem::take(&mut self.session.remote_candidate_buffer);
        if !pending.is_empty() {
            debug!(count = pending.len(), "applying queued remote candidates");
        }
        for candidate in pending {
            self.apply_remote_candidate(transport, candidate).await;
        }
    }

    /// A rejected candidate is logged and skipped
    async fn apply_remote_candidate(
        &mut self,
        transport: &Arc<dyn SessionTransport>,
        candidate: IceCandidate,
    ) {
        match transport.add_ice_candidate(candidate.clone()).await {
            Ok(()) => self.session.applied_candidates.push(candidate),
            Err(e) => {
                let err = CallError::CandidateApplication(e);
                warn!(candidate = %candidate.candidate, "{err}");
            }
        }
    }
}
