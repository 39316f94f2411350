use std::fmt;

use super::TagError;

pub const AVC_SEQUENCE_HEADER: u8 = 0;
pub const AVC_NALU: u8 = 1;
pub const AVC_END_OF_SEQUENCE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VideoCodec {
    H263,
    Screen,
    VP6,
    VP6Alpha,
    ScreenV2,
    Avc, // H.264
    Unknown(u8),
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCodec::H263 => write!(f, "Sorenson H.263"),
            VideoCodec::Screen => write!(f, "Screen Video"),
            VideoCodec::VP6 => write!(f, "VP6"),
            VideoCodec::VP6Alpha => write!(f, "VP6 Alpha"),
            VideoCodec::ScreenV2 => write!(f, "Screen Video V2"),
            VideoCodec::Avc => write!(f, "H.264/AVC"),
            VideoCodec::Unknown(id) => write!(f, "Unknown ({})", id),
        }
    }
}

impl VideoCodec {
    pub fn from_id(id: u8) -> Self {
        match id {
            2 => VideoCodec::H263,
            3 => VideoCodec::Screen,
            4 => VideoCodec::VP6,
            5 => VideoCodec::VP6Alpha,
            6 => VideoCodec::ScreenV2,
            7 => VideoCodec::Avc,
            _ => VideoCodec::Unknown(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameType {
    Keyframe,
    Inter,
    DisposableInter,
    GeneratedKeyframe,
    VideoInfo,
    Unknown(u8),
}

impl FrameType {
    pub fn from_id(id: u8) -> Self {
        match id {
            1 => FrameType::Keyframe,
            2 => FrameType::Inter,
            3 => FrameType::DisposableInter,
            4 => FrameType::GeneratedKeyframe,
            5 => FrameType::VideoInfo,
            _ => FrameType::Unknown(id),
        }
    }
}

/// FLV VIDEODATA header. The AVC fields are only meaningful for H.264.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoTag {
    pub frame_type: FrameType,
    pub codec: VideoCodec,
    pub avc_packet_type: Option<u8>,
    /// Signed 24-bit offset in milliseconds, zero unless the packet is a NALU.
    pub composition_time: i32,
}

impl VideoTag {
    pub fn is_keyframe(&self) -> bool {
        matches!(
            self.frame_type,
            FrameType::Keyframe | FrameType::GeneratedKeyframe
        )
    }

    pub fn is_sequence_header(&self) -> bool {
        self.frame_type == FrameType::Keyframe
            && self.avc_packet_type == Some(AVC_SEQUENCE_HEADER)
    }
}

pub fn parse_video_tag(data: &[u8]) -> Result<VideoTag, TagError> {
    let Some(&flags) = data.first() else {
        return Err(TagError::TooShort { want: 1, got: 0 });
    };

    let mut tag = VideoTag {
        frame_type: FrameType::from_id(flags >> 4),
        codec: VideoCodec::from_id(flags & 0x0f),
        avc_packet_type: None,
        composition_time: 0,
    };

    if let FrameType::Unknown(id) = tag.frame_type {
        return Err(TagError::Invalid(format!("unknown frame type {id}")));
    }

    if tag.codec == VideoCodec::Avc && tag.frame_type != FrameType::VideoInfo {
        if data.len() < 5 {
            return Err(TagError::TooShort { want: 5, got: data.len() });
        }
        let packet_type = data[1];
        if packet_type > AVC_END_OF_SEQUENCE {
            return Err(TagError::Invalid(format!("unknown AVC packet type {packet_type}")));
        }
        tag.avc_packet_type = Some(packet_type);
        if packet_type == AVC_NALU {
            let raw = ((data[2] as i32) << 16) | ((data[3] as i32) << 8) | (data[4] as i32);
            // Sign-extend from 24-bit
            tag.composition_time = (raw << 8) >> 8;
        }
    }

    Ok(tag)
}

/// Profile and level from an AVCDecoderConfigurationRecord.
#[derive(Debug, Clone, PartialEq)]
pub struct AvcConfig {
    pub profile: String,
    pub level: String,
}

/// Parses the AVCDecoderConfigurationRecord that follows the 5-byte AVC tag header.
pub fn parse_avc_config(data: &[u8]) -> Option<AvcConfig> {
    if data.len() < 4 {
        return None;
    }
    let profile_idc = data[1];
    let level_idc = data[3];
    Some(AvcConfig {
        profile: h264_profile_name(profile_idc),
        level: format!("{}.{}", level_idc / 10, level_idc % 10),
    })
}

fn h264_profile_name(profile_idc: u8) -> String {
    match profile_idc {
        66 => "Baseline".to_string(),
        77 => "Main".to_string(),
        88 => "Extended".to_string(),
        100 => "High".to_string(),
        110 => "High 10".to_string(),
        122 => "High 4:2:2".to_string(),
        244 => "High 4:4:4 Predictive".to_string(),
        _ => format!("Profile {}", profile_idc),
    }
}
