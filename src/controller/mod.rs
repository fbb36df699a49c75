//! Negotiation controller: the offer/answer state machine for one client.
//!
//! The controller is driven from a single task. Relay messages, transport
//! callbacks and commands from [`CallHandle`]s are multiplexed in
//! [`NegotiationController::run`], so every handler runs to completion
//! before the next input is looked at. Dependent transport steps are awaited
//! in sequence inside a handler.

mod handlers;
mod lifecycle;

use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::logger::SignalEmitter;
use crate::media::MediaProvider;
use crate::peer::ice::spawn_probe;
use crate::peer::transport::{SessionTransportEvent, TransportFactory};
use crate::session::{EndReason, Session};
use crate::signaling::{RelayChannel, RelayMessage, EVENT_TABLE};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub(crate) enum Command {
    Join(oneshot::Sender<CallResult<()>>),
    StartCall(oneshot::Sender<CallResult<()>>),
    EndCall(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
    DisconnectGraceElapsed { session_id: u64 },
}

/// Cloneable handle for issuing call instructions to a running controller
#[derive(Debug, Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl CallHandle {
    /// Acquire local media and wait for the relay to pick a role
    pub async fn join(&self) -> CallResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Join(reply))
            .map_err(|_| CallError::ControllerGone)?;
        rx.await.map_err(|_| CallError::ControllerGone)?
    }

    /// Join if needed, then originate the call as offerer
    pub async fn start_call(&self) -> CallResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::StartCall(reply))
            .map_err(|_| CallError::ControllerGone)?;
        rx.await.map_err(|_| CallError::ControllerGone)?
    }

    pub async fn end_call(&self) -> CallResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::EndCall(reply))
            .map_err(|_| CallError::ControllerGone)?;
        rx.await.map_err(|_| CallError::ControllerGone)
    }

    /// Ends any call and stops the controller task
    pub async fn shutdown(&self) -> CallResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(reply))
            .map_err(|_| CallError::ControllerGone)?;
        rx.await.map_err(|_| CallError::ControllerGone)
    }
}

pub struct NegotiationController {
    config: CallConfig,
    relay: Arc<dyn RelayChannel>,
    media: Arc<dyn MediaProvider>,
    factory: Arc<dyn TransportFactory>,
    signals: SignalEmitter,
    session: Session,
    next_session_id: u64,
    transport_tx: mpsc::UnboundedSender<SessionTransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<SessionTransportEvent>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
}

impl NegotiationController {
    pub fn new(
        config: CallConfig,
        relay: Arc<dyn RelayChannel>,
        media: Arc<dyn MediaProvider>,
        factory: Arc<dyn TransportFactory>,
        signals: SignalEmitter,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            config,
            relay,
            media,
            factory,
            signals,
            session: Session::new(0),
            next_session_id: 0,
            transport_tx,
            transport_rx,
            commands_tx,
            commands_rx,
        }
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            tx: self.commands_tx.clone(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Drives the controller until shutdown or until the relay stream closes
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<RelayMessage>) {
        if let Some(server) = self.config.relay_probe.clone() {
            // advisory only; shares nothing with negotiation
            spawn_probe(server, self.config.probe_timeout(), self.signals.clone());
        }
        info!(participant = %self.config.participant_id, "negotiation controller running");

        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(msg) => self.handle_relay_message(msg).await,
                    None => {
                        info!("relay stream closed");
                        self.end_session(EndReason::Unmounted, true).await;
                        break;
                    }
                },
                Some(ev) = self.transport_rx.recv() => self.handle_transport_event(ev).await,
                Some(cmd) = self.commands_rx.recv() => {
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }
            }
        }
        debug!("negotiation controller stopped");
    }

    /// Returns false when the controller should stop
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Join(reply) => {
                let result = self.join().await;
                let _ = reply.send(result);
            }
            Command::StartCall(reply) => {
                let result = self.start_call().await;
                let _ = reply.send(result);
            }
            Command::EndCall(reply) => {
                self.end_call().await;
                let _ = reply.send(());
            }
            Command::Shutdown(reply) => {
                self.end_session(EndReason::Unmounted, true).await;
                let _ = reply.send(());
                return false;
            }
            Command::DisconnectGraceElapsed { session_id } => {
                self.on_grace_elapsed(session_id).await;
            }
        }
        true
    }

    /// Decodes one relay message and applies it. Bad messages are logged and dropped.
    pub async fn handle_relay_message(&mut self, msg: RelayMessage) {
        match EVENT_TABLE.decode(&msg) {
            Ok(event) => {
                if let Err(e) = self.handle_inbound(event).await {
                    warn!(event = %msg.event, state = ?self.session.state(), "relay event failed: {e}");
                }
            }
            Err(e) => warn!("dropping relay message: {e}"),
        }
    }

    /// Applies every transport callback queued so far
    pub async fn process_transport_events(&mut self) {
        while let Ok(ev) = self.transport_rx.try_recv() {
            self.handle_transport_event(ev).await;
        }
    }
}
