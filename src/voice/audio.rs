//! PCM helpers: WAV wrapping and the fallback tone

use std::sync::LazyLock;

use crate::Result;

static FALLBACK_TONE: LazyLock<Option<Vec<u8>>> = LazyLock::new(|| {
    fallback_tone()
        .inspect_err(|e| tracing::error!(error = %e, "failed to encode fallback tone"))
        .ok()
});

/// Sample rate of the fallback tone
pub const TONE_SAMPLE_RATE: u32 = 16_000;

/// Wrap raw 16-bit little-endian mono PCM in a WAV container
///
/// A trailing odd byte is dropped.
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for frame in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([frame[0], frame[1]]))?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Generate the beep sent when speech synthesis fails
///
/// One second of a 440 Hz sine at 30% volume, encoded as 16-bit mono WAV.
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn fallback_tone() -> Result<Vec<u8>> {
    let frequency = 440.0_f32;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TONE_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        #[allow(clippy::cast_precision_loss)]
        for i in 0..TONE_SAMPLE_RATE {
            let t = i as f32 / TONE_SAMPLE_RATE as f32;
            let sample = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3;
            #[allow(clippy::cast_possible_truncation)]
            writer.write_sample((sample * 32767.0) as i16)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// The fallback tone, encoded once per process
///
/// `None` only if encoding failed; every later call returns the same result.
#[must_use]
pub fn cached_fallback_tone() -> Option<&'static [u8]> {
    FALLBACK_TONE.as_deref()
}
