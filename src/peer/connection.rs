use crate::config::CallConfig;
use crate::error::TransportError;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::media::LocalTrack;
use crate::peer::ice::{from_rtc_candidate, to_rtc_candidate};
use crate::peer::transport::{SessionTransport, TransportEvent, TransportEventSink, TransportFactory};
use crate::peer::types::{
    IceCandidate, IceServerConfig, PeerState, RemoteTrack, SdpKind, SessionDescription,
    SignalingState, TrackKind,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        RTCPeerConnection,
    },
};

/// Builds webrtc-rs peer connections for sessions
#[derive(Debug, Clone)]
pub struct WebRtcTransportFactory {
    ice_servers: Vec<IceServerConfig>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Self {
        Self { ice_servers }
    }

    pub fn from_config(config: &CallConfig) -> Self {
        Self::new(config.ice_servers.clone())
    }
}

/// Peer connection configuration for the given servers
fn rtc_config(servers: &[IceServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn peer_state(st: RTCPeerConnectionState) -> PeerState {
    match st {
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
        _ => PeerState::New,
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|e| TransportError::InvalidDescription(e.to_string()))
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        events: TransportEventSink,
    ) -> Result<Arc<dyn SessionTransport>, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(&self.ice_servers))
                .await
                .map_err(|e| TransportError::Unavailable(e.to_string()))?,
        );
        let session = events.session_id();

        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                match cand {
                    Some(c) => {
                        if let Some(c) = from_rtc_candidate(&c) {
                            dump_candidate("LOCAL", &c);
                            sink.emit(TransportEvent::CandidateGenerated(c));
                        }
                    }
                    // None = сбор кандидатов завершен
                    None => sink.emit(TransportEvent::GatheringComplete),
                }
            })
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!(session, "ICE gathering state changed to: {:?}", state);
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                sink.emit(TransportEvent::TrackReceived(RemoteTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                    handle: Some(track),
                }));
                Box::pin(async {})
            },
        ));

        // слабая ссылка, чтобы колбэк не держал pc живым
        let pc_stats = Arc::downgrade(&pc);
        let sink = events;
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!(session, "Peer connection state changed to: {:?}", st);
            if matches!(
                st,
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
            ) {
                if let Some(pc) = pc_stats.upgrade() {
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, "BEFORE-FAIL").await;
                    });
                }
            }
            sink.emit(TransportEvent::StateChanged(peer_state(st)));
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcTransport {
            pc,
            senders: Mutex::new(HashMap::new()),
        }))
    }
}

/// Session transport backed by an `RTCPeerConnection`
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<String, Arc<RTCRtpSender>>>,
}

impl WebRtcTransport {
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

#[async_trait]
impl SessionTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pc.set_local_description(to_rtc_description(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.pc
            .add_ice_candidate(to_rtc_candidate(&candidate))
            .await
            .map_err(|e| TransportError::CandidateRejected(e.to_string()))
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), TransportError> {
        let local: Arc<dyn TrackLocal + Send + Sync> = track.track.clone();
        let sender = self.pc.add_track(local).await?;

        // RTCP надо вычитывать, иначе интерсепторы (NACK, отчеты) не работают
        let rtcp = sender.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp.read(&mut buf).await.is_ok() {}
        });

        self.senders.lock().await.insert(track.id().to_owned(), sender);
        Ok(())
    }

    async fn remove_track(&self, track: &LocalTrack) -> Result<(), TransportError> {
        let sender = self.senders.lock().await.remove(track.id());
        match sender {
            Some(sender) => {
                self.pc.remove_track(&sender).await?;
                Ok(())
            }
            None => {
                warn!(track = track.id(), "remove_track: track was never attached");
                Ok(())
            }
        }
    }

    async fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::Stable => SignalingState::Stable,
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            _ => SignalingState::Other,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.senders.lock().await.clear();
        self.pc.close().await?;
        Ok(())
    }
}
