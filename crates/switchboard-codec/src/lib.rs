//! G.711 μ-law frame codec for the telephony leg.
//!
//! The telephony provider delivers audio as 20 ms frames of 8 kHz μ-law
//! (160 bytes per frame); the voice-AI backend speaks linear PCM16. This
//! crate converts between the two. Encode and decode are pure, stateless,
//! and constant-time per frame.
//!
//! A malformed frame (wrong length) yields a [`CodecError`] that callers
//! treat as skip-and-continue: log, drop the frame, keep the call alive.
//! A single corrupt frame must never terminate a call.
//!
//! The μ-law compression/expansion follows ITU-T Recommendation G.711
//! (bias 33, eight segments, sign-magnitude layout).

use thiserror::Error;

/// Sample rate of the provider's narrowband leg.
pub const SAMPLE_RATE_HZ: u32 = 8_000;

/// Duration of one provider frame.
pub const FRAME_MS: u32 = 20;

/// Samples (and μ-law bytes) in one 20 ms frame at 8 kHz.
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE_HZ as usize / 1000) * FRAME_MS as usize;

/// Errors produced by frame encode/decode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The frame does not contain exactly one 20 ms chunk.
    #[error("malformed frame: expected {expected} samples, got {actual}")]
    FrameLength { expected: usize, actual: usize },
}

/// Decodes one provider frame (160 μ-law bytes) to linear PCM16.
pub fn decode(frame: &[u8]) -> Result<Vec<i16>, CodecError> {
    if frame.len() != FRAME_SAMPLES {
        return Err(CodecError::FrameLength {
            expected: FRAME_SAMPLES,
            actual: frame.len(),
        });
    }
    Ok(frame.iter().map(|&b| ulaw_expand(b)).collect())
}

/// Encodes one frame of linear PCM16 (160 samples) to provider μ-law bytes.
pub fn encode(pcm: &[i16]) -> Result<Vec<u8>, CodecError> {
    if pcm.len() != FRAME_SAMPLES {
        return Err(CodecError::FrameLength {
            expected: FRAME_SAMPLES,
            actual: pcm.len(),
        });
    }
    Ok(pcm.iter().map(|&s| ulaw_compress(s)).collect())
}

/// Decodes a μ-law payload of any whole-frame-multiple length.
///
/// The realtime backend's audio deltas are not frame-aligned; this variant
/// accepts any non-empty payload and leaves 20 ms framing to the caller.
pub fn decode_unframed(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| ulaw_expand(b)).collect()
}

/// Encodes an arbitrary-length PCM16 buffer to μ-law bytes.
pub fn encode_unframed(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().map(|&s| ulaw_compress(s)).collect()
}

/// μ-law compression of one sample per ITU-T G.711.
///
/// The input's top 14 bits are used; a bias of 33 is added before the
/// segment search so the smallest segment has a uniform step size.
fn ulaw_compress(sample: i16) -> u8 {
    let magnitude = if sample < 0 {
        (((!sample) as u16) >> 2) as i16 + 33
    } else {
        (sample >> 2) + 33
    };
    let magnitude = magnitude.min(0x1FFF);

    // Segment number: position of the leading bit above the mantissa.
    let mut segment = 1;
    let mut probe = magnitude >> 6;
    while probe != 0 {
        segment += 1;
        probe >>= 1;
    }

    let high_nibble = 0x0008 - segment;
    let low_nibble = 0x000F - ((magnitude >> segment) & 0x000F);
    let mut byte = (high_nibble << 4) | low_nibble;
    if sample >= 0 {
        byte |= 0x0080;
    }
    byte as u8
}

/// μ-law expansion of one byte per ITU-T G.711.
fn ulaw_expand(byte: u8) -> i16 {
    let sign: i16 = if byte < 0x80 { -1 } else { 1 };
    let inverted = (!byte) as i16;
    let exponent = (inverted >> 4) & 0x0007;
    let mantissa = inverted & 0x000F;
    let step = 4 << (exponent + 1);

    sign * ((0x0080 << exponent) + step * mantissa + step / 2 - 4 * 33)
}
