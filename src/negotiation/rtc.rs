//! `webrtc` crate implementation of the peer seam

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::peer::{
    DataChannelLink, PeerConnectionState, PeerEventKind, PeerEventSender, PeerFactory, PeerLink,
};
use crate::config::WebRtcConfig;
use crate::error::{AgentError, Result};
use crate::media::MediaTrackProvider;
use crate::protocol::signaling::{IceCandidate, SessionDescription};

/// ICE servers for the peer connection configuration
pub fn ice_servers(config: &WebRtcConfig) -> Vec<RTCIceServer> {
    let stun = config.stun_servers.iter().map(|url| RTCIceServer {
        urls: vec![url.clone()],
        ..Default::default()
    });

    let turn = config.turn_servers.iter().map(|server| RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone(),
        credential: server.credential.clone(),
        ..Default::default()
    });

    stun.chain(turn).collect()
}

/// Builds `RTCPeerConnection`s with the local media track attached
pub struct RtcPeerFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
    media: Arc<dyn MediaTrackProvider>,
}

impl RtcPeerFactory {
    /// # Errors
    ///
    /// Returns [`AgentError::NegotiationFailure`] if the codec or interceptor
    /// registration fails
    pub fn new(config: &WebRtcConfig, media: Arc<dyn MediaTrackProvider>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers: ice_servers(config),
            media,
        })
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(&self, events: PeerEventSender) -> Result<Arc<dyn PeerLink>> {
        let configuration = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(configuration).await?);

        if let Some(track) = self.media.video_track() {
            let sender = pc.add_track(track).await?;
            // RTCP has to be drained for the interceptors to work
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }

        register_callbacks(&pc, events);
        Ok(Arc::new(RtcPeerLink { pc }))
    }
}

fn register_callbacks(pc: &RTCPeerConnection, events: PeerEventSender) {
    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                tx.emit(PeerEventKind::GatheringComplete);
                return;
            };
            match candidate.to_json() {
                Ok(init) => tx.emit(PeerEventKind::LocalCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                })),
                Err(e) => warn!("Skipping unserializable local candidate: {}", e),
            }
        })
    }));

    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let mapped = match state {
            RTCPeerConnectionState::New => Some(PeerConnectionState::New),
            RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
            RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
            RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
            RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
            RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
            _ => None,
        };
        if let Some(mapped) = mapped {
            tx.emit(PeerEventKind::ConnectionState(mapped));
        }
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_negotiation_needed(Box::new(move || {
        tx.emit(PeerEventKind::RenegotiationNeeded);
        Box::pin(async {})
    }));

    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let tx = events.clone();
        Box::pin(async move {
            info!("Operator opened data channel '{}'", dc.label());
            watch_data_channel(dc, tx);
        })
    }));
}

fn watch_data_channel(dc: Arc<RTCDataChannel>, events: PeerEventSender) {
    let tx = events.clone();
    let link: Arc<dyn DataChannelLink> = Arc::new(RtcDataChannel { dc: dc.clone() });
    dc.on_open(Box::new(move || {
        tx.emit(PeerEventKind::DataChannelOpen(link));
        Box::pin(async {})
    }));

    let tx = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        tx.emit(PeerEventKind::DataChannelMessage(msg.data));
        Box::pin(async {})
    }));

    let id = dc.id();
    dc.on_close(Box::new(move || {
        events.emit(PeerEventKind::DataChannelClosed(id));
        Box::pin(async {})
    }));
}

struct RtcPeerLink {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn set_remote_offer(&self, sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp.to_owned())?;
        self.pc.set_remote_description(offer).await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_answer(&self, answer: &SessionDescription) -> Result<()> {
        let answer = RTCSessionDescription::answer(answer.sdp.clone())?;
        self.pc.set_local_description(answer).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing peer connection");
        self.pc.close().await?;
        Ok(())
    }
}

struct RtcDataChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannelLink for RtcDataChannel {
    fn id(&self) -> u16 {
        self.dc.id()
    }

    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.dc
            .send_text(text)
            .await
            .map_err(|e| AgentError::NegotiationFailure(format!("Data channel send failed: {}", e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.dc.close().await?;
        Ok(())
    }
}
