use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use webrtc::track::track_remote::TrackRemote;

/// Kind of a session description
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Opaque session description in the browser JSON shape `{type, sdp}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Offer plus the relay participant that created it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OfferDescriptor {
    pub offer: SessionDescription,
    pub offerer: String,
}

/// Answer tagged with the offerer it answers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AnswerDescriptor {
    pub answer: SessionDescription,
    pub offerer: String,
}

/// ICE candidate for the WebRTC connection, browser JSON shape
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    /// Identity used to spot redelivered candidates; the ufrag is ignored
    pub fn same_candidate(&self, other: &IceCandidate) -> bool {
        self.candidate == other.candidate
            && self.sdp_mid == other.sdp_mid
            && self.sdp_mline_index == other.sdp_mline_index
    }
}

/// A locally generated candidate as forwarded to the relay
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TaggedCandidate {
    pub did_i_offer: bool,
    pub ice_candidate: IceCandidate,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Stun,
    Turn,
}

/// ICE server configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceServerConfig {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ServerKind,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            kind: ServerKind::Stun,
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            kind: ServerKind::Turn,
            url: url.into(),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    /// Checks the fields a peer connection needs before it is built
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("server URL cannot be empty".into());
        }
        if self.kind == ServerKind::Turn && (self.username.is_none() || self.credential.is_none())
        {
            return Err(format!(
                "TURN server {} requires username and credential",
                self.url
            ));
        }
        Ok(())
    }
}

/// Transport connection state as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Signaling state of the transport, reduced to what negotiation inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Track delivered by the remote peer
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    /// Native track for rendering; absent for transports without real media
    pub handle: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .field("native", &self.handle.is_some())
            .finish()
    }
}
