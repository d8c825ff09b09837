//! Minimal RIFF/WAVE support for 16-bit PCM voice notes.

use crate::error::AudioError;

const HEADER_LEN: usize = 44;

/// Scale a float sample to 16-bit little-endian PCM.
pub fn sample_to_pcm16(sample: f32) -> [u8; 2] {
    ((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes()
}

/// Wrap 16-bit little-endian PCM in a WAV header.
pub fn encode(sample_rate: u32, channels: u16, pcm: &[u8]) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let block_align = channels * 2;
    let mut out = Vec::with_capacity(HEADER_LEN + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

/// Mono samples in -1.0..=1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Decode 16-bit PCM WAV, mixing all channels down to mono.
pub fn decode(bytes: &[u8]) -> Result<Decoded, AudioError> {
    if bytes.len() < 12 || &bytes[..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(AudioError::InvalidWav("not a RIFF/WAVE file"));
    }
    let mut format = None;
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let len = u32_at(bytes, pos + 4) as usize;
        let start = pos + 8;
        let end = start.saturating_add(len).min(bytes.len());
        let body = &bytes[start..end];
        match &bytes[pos..pos + 4] {
            b"fmt " => {
                if body.len() < 16 {
                    return Err(AudioError::InvalidWav("short fmt chunk"));
                }
                if u16_at(body, 0) != 1 || u16_at(body, 14) != 16 {
                    return Err(AudioError::InvalidWav("only 16-bit PCM is supported"));
                }
                let channels = u16_at(body, 2);
                let sample_rate = u32_at(body, 4);
                if channels == 0 || sample_rate == 0 {
                    return Err(AudioError::InvalidWav("empty format"));
                }
                format = Some((channels, sample_rate));
            }
            b"data" => {
                let (channels, sample_rate) = format.ok_or(AudioError::InvalidWav("data before fmt"))?;
                let channels = usize::from(channels);
                let samples = body
                    .chunks_exact(2 * channels)
                    .map(|frame| {
                        frame
                            .chunks_exact(2)
                            .map(|s| f32::from(i16::from_le_bytes([s[0], s[1]])) / i16::MAX as f32)
                            .sum::<f32>()
                            / channels as f32
                    })
                    .collect();
                return Ok(Decoded { sample_rate, samples });
            }
            _ => {}
        }
        // chunks are word aligned
        pos = start.saturating_add(len).saturating_add(len & 1);
    }
    Err(AudioError::InvalidWav("no data chunk"))
}
