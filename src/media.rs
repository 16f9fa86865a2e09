//! # Media Track
//!
//! Outbound video attached to every peer connection.
//!
//! Capture and encoding happen outside this crate. The encoder pushes
//! H.264 access units into [`H264Track::write_sample`]; the track fans them
//! out to whichever peer connection is currently bound to it.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::Result;

const TRACK_ID: &str = "video";
const STREAM_ID: &str = "robot";

/// Source of the local media track
pub trait MediaTrackProvider: Send + Sync {
    /// Track to attach to a new peer connection; `None` for a data-only session
    fn video_track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>>;
}

/// H.264 sample track shared by all sessions
#[derive(Clone)]
pub struct H264Track {
    track: Arc<TrackLocalStaticSample>,
}

impl H264Track {
    pub fn new() -> Self {
        let codec = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_owned(),
            clock_rate: 90_000,
            channels: 0,
            sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                .to_owned(),
            rtcp_feedback: vec![],
        };

        Self {
            track: Arc::new(TrackLocalStaticSample::new(
                codec,
                TRACK_ID.to_owned(),
                STREAM_ID.to_owned(),
            )),
        }
    }

    /// Push one encoded access unit
    ///
    /// A no-op while no peer connection is bound.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()> {
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        self.track.write_sample(&sample).await?;
        Ok(())
    }
}

impl Default for H264Track {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaTrackProvider for H264Track {
    fn video_track(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        Some(self.track.clone())
    }
}
