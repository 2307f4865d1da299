//! RTP header extensions and RTCP feedback negotiated per direction.

use std::fmt;

pub const SDES_MID_URI: &str = "urn:ietf:params:rtp-hdrext:sdes:mid";
pub const SDES_RTP_STREAM_ID_URI: &str = "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id";
pub const AUDIO_LEVEL_URI: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";
pub const TRANSPORT_CC_URI: &str =
    "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";
pub const FRAME_MARKING_URI: &str = "urn:ietf:params:rtp-hdrext:framemarking";
pub const DEPENDENCY_DESCRIPTOR_URI: &str =
    "https://aomediacodec.github.io/av1-rtp-spec/#dependency-descriptor-rtp-header-extension";
pub const ABS_SEND_TIME_URI: &str = "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time";

pub const TYPE_RTCP_FB_TRANSPORT_CC: &str = "transport-cc";
pub const TYPE_RTCP_FB_GOOG_REMB: &str = "goog-remb";
pub const TYPE_RTCP_FB_CCM: &str = "ccm";
pub const TYPE_RTCP_FB_NACK: &str = "nack";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RtcpFeedback {
    pub typ: String,
    pub parameter: String,
}

impl RtcpFeedback {
    pub fn new(typ: &str, parameter: &str) -> Self {
        Self {
            typ: typ.to_string(),
            parameter: parameter.to_string(),
        }
    }
    fn nack() -> Self {
        Self::new(TYPE_RTCP_FB_NACK, "")
    }
    fn nack_pli() -> Self {
        Self::new(TYPE_RTCP_FB_NACK, "pli")
    }
    fn ccm_fir() -> Self {
        Self::new(TYPE_RTCP_FB_CCM, "fir")
    }
    fn transport_cc() -> Self {
        Self::new(TYPE_RTCP_FB_TRANSPORT_CC, "")
    }
    fn goog_remb() -> Self {
        Self::new(TYPE_RTCP_FB_GOOG_REMB, "")
    }
}

impl fmt::Display for RtcpFeedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parameter.is_empty() {
            f.write_str(&self.typ)
        } else {
            write!(f, "{} {}", self.typ, self.parameter)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderExtensions {
    pub audio: Vec<String>,
    pub video: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RtcpFeedbackConfig {
    pub audio: Vec<RtcpFeedback>,
    pub video: Vec<RtcpFeedback>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectionProfile {
    pub header_extensions: HeaderExtensions,
    pub rtcp_feedback: RtcpFeedbackConfig,
    pub strict_acks: bool,
}

fn uris(list: &[&str]) -> Vec<String> {
    list.iter().map(|uri| uri.to_string()).collect()
}

impl DirectionProfile {
    /// Media flowing from a client into the server. The client dials this
    /// connection and always acknowledges, so ACKs are strict.
    pub fn publisher() -> Self {
        Self {
            header_extensions: HeaderExtensions {
                audio: uris(&[SDES_MID_URI, SDES_RTP_STREAM_ID_URI, AUDIO_LEVEL_URI]),
                video: uris(&[
                    SDES_MID_URI,
                    SDES_RTP_STREAM_ID_URI,
                    TRANSPORT_CC_URI,
                    FRAME_MARKING_URI,
                    DEPENDENCY_DESCRIPTOR_URI,
                ]),
            },
            rtcp_feedback: RtcpFeedbackConfig {
                audio: vec![RtcpFeedback::nack()],
                video: vec![
                    RtcpFeedback::transport_cc(),
                    RtcpFeedback::ccm_fir(),
                    RtcpFeedback::nack(),
                    RtcpFeedback::nack_pli(),
                ],
            },
            strict_acks: true,
        }
    }

    /// Media flowing from the server to a client.
    ///
    /// `use_send_side_bwe` picks transport-wide CC; otherwise the receiver
    /// estimates with abs-send-time and reports back with REMB.
    pub fn subscriber(strict_acks: bool, use_send_side_bwe: bool) -> Self {
        let mut video_extensions = uris(&[DEPENDENCY_DESCRIPTOR_URI]);
        let mut video_feedback = vec![
            RtcpFeedback::ccm_fir(),
            RtcpFeedback::nack(),
            RtcpFeedback::nack_pli(),
        ];
        if use_send_side_bwe {
            video_extensions.push(TRANSPORT_CC_URI.to_string());
            video_feedback.push(RtcpFeedback::transport_cc());
        } else {
            video_extensions.push(ABS_SEND_TIME_URI.to_string());
            video_feedback.push(RtcpFeedback::goog_remb());
        }
        Self {
            header_extensions: HeaderExtensions {
                audio: Vec::new(),
                video: video_extensions,
            },
            rtcp_feedback: RtcpFeedbackConfig {
                audio: Vec::new(),
                video: video_feedback,
            },
            strict_acks,
        }
    }
}
