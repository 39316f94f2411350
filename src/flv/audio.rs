use std::fmt;

use super::TagError;

pub const SOUND_RATE_44K: u8 = 3;
pub const AAC_SEQUENCE_HEADER: u8 = 0;
pub const AAC_RAW: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioCodec {
    LinearPcmPlatformEndian,
    Adpcm,
    Mp3,
    LinearPcmLittleEndian,
    Nellymoser16k,
    Nellymoser8k,
    Nellymoser,
    G711ALaw,
    G711MuLaw,
    Aac,
    Speex,
    Mp3_8k,
    DeviceSpecific,
    Unknown(u8),
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioCodec::LinearPcmPlatformEndian => write!(f, "Linear PCM"),
            AudioCodec::Adpcm => write!(f, "ADPCM"),
            AudioCodec::Mp3 => write!(f, "MP3"),
            AudioCodec::LinearPcmLittleEndian => write!(f, "Linear PCM (LE)"),
            AudioCodec::Nellymoser16k => write!(f, "Nellymoser 16kHz"),
            AudioCodec::Nellymoser8k => write!(f, "Nellymoser 8kHz"),
            AudioCodec::Nellymoser => write!(f, "Nellymoser"),
            AudioCodec::G711ALaw => write!(f, "G.711 A-law"),
            AudioCodec::G711MuLaw => write!(f, "G.711 mu-law"),
            AudioCodec::Aac => write!(f, "AAC"),
            AudioCodec::Speex => write!(f, "Speex"),
            AudioCodec::Mp3_8k => write!(f, "MP3 8kHz"),
            AudioCodec::DeviceSpecific => write!(f, "Device Specific"),
            AudioCodec::Unknown(id) => write!(f, "Unknown ({})", id),
        }
    }
}

impl AudioCodec {
    pub fn from_id(id: u8) -> Self {
        match id {
            0 => AudioCodec::LinearPcmPlatformEndian,
            1 => AudioCodec::Adpcm,
            2 => AudioCodec::Mp3,
            3 => AudioCodec::LinearPcmLittleEndian,
            4 => AudioCodec::Nellymoser16k,
            5 => AudioCodec::Nellymoser8k,
            6 => AudioCodec::Nellymoser,
            7 => AudioCodec::G711ALaw,
            8 => AudioCodec::G711MuLaw,
            10 => AudioCodec::Aac,
            11 => AudioCodec::Speex,
            14 => AudioCodec::Mp3_8k,
            15 => AudioCodec::DeviceSpecific,
            _ => AudioCodec::Unknown(id),
        }
    }
}

/// FLV AUDIODATA header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioTag {
    pub codec: AudioCodec,
    /// Raw 2-bit SoundRate index.
    pub sound_rate: u8,
    pub sample_rate: u32,
    pub sample_size: u8,
    pub channels: u8,
    /// Only present for AAC.
    pub aac_packet_type: Option<u8>,
}

impl AudioTag {
    pub fn is_sequence_header(&self) -> bool {
        self.codec == AudioCodec::Aac && self.aac_packet_type == Some(AAC_SEQUENCE_HEADER)
    }
}

pub fn parse_audio_tag(data: &[u8]) -> Result<AudioTag, TagError> {
    let Some(&flags) = data.first() else {
        return Err(TagError::TooShort { want: 1, got: 0 });
    };

    let codec = AudioCodec::from_id(flags >> 4);
    let sound_rate = (flags >> 2) & 0x03;
    let stereo = flags & 0x01 == 1;

    let mut tag = AudioTag {
        codec,
        sound_rate,
        sample_rate: match sound_rate {
            0 => 5500,
            1 => 11025,
            2 => 22050,
            _ => 44100,
        },
        sample_size: if (flags >> 1) & 0x01 == 0 { 8 } else { 16 },
        channels: if stereo { 2 } else { 1 },
        aac_packet_type: None,
    };

    match codec {
        AudioCodec::Aac => {
            // AAC always signals 44 kHz stereo in the tag header
            if sound_rate != SOUND_RATE_44K {
                return Err(TagError::Invalid(format!(
                    "AAC sound rate must be {SOUND_RATE_44K}, got {sound_rate}"
                )));
            }
            if !stereo {
                return Err(TagError::Invalid("AAC sound type must be stereo".into()));
            }
            let packet_type = *data
                .get(1)
                .ok_or(TagError::TooShort { want: 2, got: data.len() })?;
            if packet_type != AAC_SEQUENCE_HEADER && packet_type != AAC_RAW {
                return Err(TagError::Invalid(format!(
                    "unknown AAC packet type {packet_type}"
                )));
            }
            tag.aac_packet_type = Some(packet_type);
        }
        AudioCodec::Nellymoser if stereo => {
            return Err(TagError::Invalid("Nellymoser sound type must be mono".into()));
        }
        _ => {}
    }

    Ok(tag)
}

/// Fields of an MPEG-4 AudioSpecificConfig, carried by the AAC sequence header.
#[derive(Debug, Clone, PartialEq)]
pub struct AacConfig {
    pub profile: String,
    pub sample_rate: Option<u32>,
    pub channels: u8,
}

const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Parses the AudioSpecificConfig that follows the 2-byte AAC tag header.
pub fn parse_aac_config(data: &[u8]) -> Option<AacConfig> {
    let (&byte0, &byte1) = (data.first()?, data.get(1)?);

    let audio_object_type = (byte0 >> 3) & 0x1f;
    let sample_freq_index = ((byte0 & 0x07) << 1) | ((byte1 >> 7) & 0x01);
    let channels = (byte1 >> 3) & 0x0f;

    let profile = match audio_object_type {
        1 => "AAC Main".to_string(),
        2 => "AAC-LC".to_string(),
        3 => "AAC SSR".to_string(),
        4 => "AAC LTP".to_string(),
        5 => "HE-AAC (SBR)".to_string(),
        29 => "HE-AAC v2 (SBR+PS)".to_string(),
        _ => format!("AAC Object Type {}", audio_object_type),
    };

    Some(AacConfig {
        profile,
        sample_rate: SAMPLE_RATES.get(sample_freq_index as usize).copied(),
        channels,
    })
}
