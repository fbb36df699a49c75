use crate::media::MediaHandle;
use crate::peer::transport::SessionTransport;
use crate::peer::types::{IceCandidate, RemoteTrack};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Negotiation role, fixed once chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    MediaAcquisition,
    TransportConstruction,
    DescriptorInstallation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    LocalHangUp,
    RemoteHangUp,
    TransportTerminated,
    DisconnectTimeout,
    Unmounted,
}

/// Negotiation state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    AcquiringMedia,
    AwaitingRole,
    Offering,
    Answering,
    DescriptorExchanged,
    Connected,
    Disconnected,
    Ended,
    Failed(FailureKind),
}

impl CallState {
    /// Ended and Failed absorb every further event
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed(_))
    }

    /// A session in this state blocks a second one from starting
    pub fn is_active(self) -> bool {
        !matches!(self, CallState::Idle) && !self.is_terminal()
    }
}

/// One call attempt. Owns the local media and the transport.
pub struct Session {
    id: u64,
    state: CallState,
    role: Option<Role>,
    pub(crate) media: Option<MediaHandle>,
    pub(crate) transport: Option<Arc<dyn SessionTransport>>,
    /// Participant who created the offer we answered
    pub(crate) remote_offerer: Option<String>,
    pub(crate) remote_description_installed: bool,
    /// Local candidates generated before the role was fixed
    pub(crate) pending_local_candidates: Vec<IceCandidate>,
    /// Remote candidates received before the remote description
    pub(crate) remote_candidate_buffer: Vec<IceCandidate>,
    pub(crate) sent_candidates: Vec<IceCandidate>,
    pub(crate) applied_candidates: Vec<IceCandidate>,
    pub(crate) remote_tracks: Vec<RemoteTrack>,
    pub(crate) grace_task: Option<JoinHandle<()>>,
    started_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: CallState::Idle,
            role: None,
            media: None,
            transport: None,
            remote_offerer: None,
            remote_description_installed: false,
            pending_local_candidates: Vec::new(),
            remote_candidate_buffer: Vec::new(),
            sent_candidates: Vec::new(),
            applied_candidates: Vec::new(),
            remote_tracks: Vec::new(),
            grace_task: None,
            started_at: Utc::now(),
            connected_at: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: CallState) {
        if state == CallState::Connected && self.connected_at.is_none() {
            self.connected_at = Some(Utc::now());
        }
        self.state = state;
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Fixes the role. A role that is already set is never changed.
    pub(crate) fn fix_role(&mut self, role: Role) -> bool {
        match self.role {
            Some(_) => false,
            None => {
                self.role = Some(role);
                true
            }
        }
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn remote_offerer(&self) -> Option<&str> {
        self.remote_offerer.as_deref()
    }

    /// True once an offer went out or an inbound offer was taken up.
    /// Only then does the far side hold state that `end_call` has to tear down.
    pub fn peer_engaged(&self) -> bool {
        self.role.is_some() || self.remote_offerer.is_some()
    }

    /// Same candidate already applied or waiting in the buffer
    pub(crate) fn has_remote_candidate(&self, candidate: &IceCandidate) -> bool {
        self.applied_candidates
            .iter()
            .chain(&self.remote_candidate_buffer)
            .any(|seen| seen.same_candidate(candidate))
    }

    pub fn buffered_remote_candidates(&self) -> &[IceCandidate] {
        &self.remote_candidate_buffer
    }

    /// Remote candidates handed to the transport, in application order
    pub fn applied_candidates(&self) -> &[IceCandidate] {
        &self.applied_candidates
    }

    /// Local candidates forwarded to the relay
    pub fn sent_candidates(&self) -> &[IceCandidate] {
        &self.sent_candidates
    }

    pub fn remote_tracks(&self) -> &[RemoteTrack] {
        &self.remote_tracks
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("role", &self.role)
            .field("media", &self.media.is_some())
            .field("transport", &self.transport.is_some())
            .field("remote_candidate_buffer", &self.remote_candidate_buffer.len())
            .field("pending_local_candidates", &self.pending_local_candidates.len())
            .finish()
    }
}
