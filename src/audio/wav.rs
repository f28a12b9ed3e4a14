//! # WAV Encoding
//!
//! Converts an `AudioBuffer` into a canonical 16-bit PCM RIFF/WAVE byte stream.
//!
//! ## Layout (all integers little-endian):
//! ```text
//! offset  size  field
//!      0     4  "RIFF"
//!      4     4  chunk size = 36 + data length
//!      8     4  "WAVE"
//!     12     4  "fmt "
//!     16     4  16 (fmt sub-chunk size)
//!     20     2  1 (PCM)
//!     22     2  channel count
//!     24     4  sample rate
//!     28     4  byte rate = sample rate * block align
//!     32     2  block align = channels * 2
//!     34     2  16 (bits per sample)
//!     36     4  "data"
//!     40     4  data length = frames * channels * 2
//!     44     …  samples
//! ```
//!
//! ## Sample Conversion:
//! `clamp(s, -1.0, 1.0) * 32767`, truncated toward zero. `1.0` becomes `32767`,
//! `-1.0` becomes `-32767` and out-of-range input saturates to those values.
//! NaN encodes as 0.

use crate::audio::{AudioBuffer, AudioError};
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Size of the fixed RIFF + fmt + data headers.
pub const WAV_HEADER_LEN: usize = 44;

const BITS_PER_SAMPLE: u16 = 16;
const BYTES_PER_SAMPLE: u16 = BITS_PER_SAMPLE / 8;
const FMT_CHUNK_LEN: u32 = 16;
const FORMAT_PCM: u16 = 1;

/// Stateless float to 16-bit PCM WAVE encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavEncoder;

impl WavEncoder {
    /// Encode a buffer into a complete WAV file held in memory.
    pub fn encode(buffer: &AudioBuffer) -> Result<WavFile, AudioError> {
        let layout = Layout::for_buffer(buffer)?;
        let mut bytes = Vec::with_capacity(WAV_HEADER_LEN + layout.data_len as usize);
        write_wav(&mut bytes, buffer, &layout)?;
        Ok(WavFile { bytes })
    }

    /// Stream the encoded WAV straight into a writer.
    ///
    /// The header is validated before anything is written, so an invalid buffer
    /// never leaves partial output behind.
    pub fn encode_to<W: Write>(buffer: &AudioBuffer, writer: &mut W) -> Result<(), AudioError> {
        let layout = Layout::for_buffer(buffer)?;
        write_wav(writer, buffer, &layout)
    }
}

/// Map one float sample onto the signed 16-bit range.
pub fn sample_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Header fields derived from a buffer.
struct Layout {
    channels: u16,
    sample_rate: u32,
    block_align: u16,
    byte_rate: u32,
    data_len: u32,
}

impl Layout {
    fn for_buffer(buffer: &AudioBuffer) -> Result<Self, AudioError> {
        let channels = buffer.channels();
        if channels == 0 {
            return Err(AudioError::InvalidAudio(
                "channel count must be at least 1".to_string(),
            ));
        }

        let block_align = channels.checked_mul(BYTES_PER_SAMPLE).ok_or_else(|| {
            AudioError::InvalidAudio(format!("{} channels overflow the block align field", channels))
        })?;

        let byte_rate = buffer
            .sample_rate()
            .checked_mul(block_align as u32)
            .ok_or_else(|| {
                AudioError::InvalidAudio(format!(
                    "sample rate {} overflows the byte rate field",
                    buffer.sample_rate()
                ))
            })?;

        // The RIFF chunk size (36 + data length) must also fit in 32 bits.
        let data_len = (buffer.frame_count() as u64) * block_align as u64;
        if data_len > (u32::MAX - 36) as u64 {
            return Err(AudioError::InvalidAudio(format!(
                "{} bytes of sample data do not fit in a RIFF container",
                data_len
            )));
        }

        Ok(Self {
            channels,
            sample_rate: buffer.sample_rate(),
            block_align,
            byte_rate,
            data_len: data_len as u32,
        })
    }
}

fn write_wav<W: Write>(writer: &mut W, buffer: &AudioBuffer, layout: &Layout) -> Result<(), AudioError> {
    writer.write_all(b"RIFF")?;
    writer.write_u32::<LittleEndian>(36 + layout.data_len)?;
    writer.write_all(b"WAVE")?;

    writer.write_all(b"fmt ")?;
    writer.write_u32::<LittleEndian>(FMT_CHUNK_LEN)?;
    writer.write_u16::<LittleEndian>(FORMAT_PCM)?;
    writer.write_u16::<LittleEndian>(layout.channels)?;
    writer.write_u32::<LittleEndian>(layout.sample_rate)?;
    writer.write_u32::<LittleEndian>(layout.byte_rate)?;
    writer.write_u16::<LittleEndian>(layout.block_align)?;
    writer.write_u16::<LittleEndian>(BITS_PER_SAMPLE)?;

    writer.write_all(b"data")?;
    writer.write_u32::<LittleEndian>(layout.data_len)?;

    for &sample in buffer.samples() {
        writer.write_i16::<LittleEndian>(sample_to_i16(sample))?;
    }

    Ok(())
}

/// An encoded WAV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavFile {
    bytes: Vec<u8>,
}

impl WavFile {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Length of the data sub-chunk in bytes.
    pub fn data_len(&self) -> usize {
        self.bytes.len().saturating_sub(WAV_HEADER_LEN)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), AudioError> {
        writer.write_all(&self.bytes)?;
        Ok(())
    }

    /// Write the file to `path`, replacing anything already there.
    ///
    /// The handle is dropped (closed) when this returns, on success or failure.
    pub fn save(&self, path: &Path) -> Result<(), AudioError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&self.bytes)?;
        writer.flush()?;
        Ok(())
    }
}

impl AsRef<[u8]> for WavFile {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_u32(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn read_u16(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    fn data_samples(bytes: &[u8]) -> Vec<i16> {
        bytes[WAV_HEADER_LEN..]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn test_empty_buffer_is_header_only() {
        let buffer = AudioBuffer::new(Vec::new(), 1, 44100).unwrap();
        let wav = WavEncoder::encode(&buffer).unwrap();

        assert_eq!(wav.len(), 44);
        assert_eq!(read_u32(wav.as_bytes(), 4), 36);
        assert_eq!(read_u32(wav.as_bytes(), 40), 0);
        assert_eq!(wav.data_len(), 0);
    }

    #[test]
    fn test_header_fields() {
        let buffer = AudioBuffer::new(vec![0.0; 6], 2, 48000).unwrap();
        let wav = WavEncoder::encode(&buffer).unwrap();
        let bytes = wav.as_bytes();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(read_u32(bytes, 16), 16);
        assert_eq!(read_u16(bytes, 20), 1);
        assert_eq!(read_u16(bytes, 22), 2);
        assert_eq!(read_u32(bytes, 24), 48000);
        assert_eq!(read_u32(bytes, 28), 48000 * 4);
        assert_eq!(read_u16(bytes, 32), 4);
        assert_eq!(read_u16(bytes, 34), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(read_u32(bytes, 40), 12);
    }

    #[test]
    fn test_length_fields_track_frame_count() {
        for (frames, channels) in [(1usize, 1u16), (7, 2), (100, 3), (441, 1)] {
            let buffer =
                AudioBuffer::new(vec![0.25; frames * channels as usize], channels, 22050).unwrap();
            let wav = WavEncoder::encode(&buffer).unwrap();
            let expected_data = frames * channels as usize * 2;

            assert_eq!(wav.len(), 44 + expected_data);
            assert_eq!(read_u32(wav.as_bytes(), 4) as usize, wav.len() - 8);
            assert_eq!(read_u32(wav.as_bytes(), 40) as usize, expected_data);
        }
    }

    #[test]
    fn test_full_scale_samples_truncate() {
        let buffer = AudioBuffer::new(vec![1.0, -1.0], 1, 44100).unwrap();
        let wav = WavEncoder::encode(&buffer).unwrap();

        assert_eq!(data_samples(wav.as_bytes()), vec![32767, -32767]);
    }

    #[test]
    fn test_out_of_range_samples_are_clamped() {
        let buffer = AudioBuffer::new(vec![2.0, 1.0, -3.5, -1.0, f32::NAN], 1, 8000).unwrap();
        let wav = WavEncoder::encode(&buffer).unwrap();

        assert_eq!(data_samples(wav.as_bytes()), vec![32767, 32767, -32767, -32767, 0]);
    }

    #[test]
    fn test_truncation_toward_zero() {
        assert_eq!(sample_to_i16(0.5), 16383);
        assert_eq!(sample_to_i16(-0.5), -16383);
        assert_eq!(sample_to_i16(0.00001), 0);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let samples: Vec<f32> = (0..480).map(|i| (i as f32 * 0.05).sin()).collect();
        let buffer = AudioBuffer::new(samples, 2, 16000).unwrap();

        assert_eq!(WavEncoder::encode(&buffer).unwrap(), WavEncoder::encode(&buffer).unwrap());
    }

    #[test]
    fn test_encode_to_matches_encode() {
        let buffer = AudioBuffer::new(vec![0.1, -0.2, 0.3, -0.4], 2, 16000).unwrap();
        let mut streamed = Vec::new();
        WavEncoder::encode_to(&buffer, &mut streamed).unwrap();

        assert_eq!(streamed, WavEncoder::encode(&buffer).unwrap().into_bytes());
    }

    #[test]
    fn test_output_decodes_with_wav_crate() {
        let samples = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
        let buffer = AudioBuffer::new(samples, 2, 16000).unwrap();
        let wav = WavEncoder::encode(&buffer).unwrap();

        let (header, data) = ::wav::read(&mut Cursor::new(wav.into_bytes())).unwrap();
        assert_eq!(header.audio_format, ::wav::WAV_FORMAT_PCM);
        assert_eq!(header.channel_count, 2);
        assert_eq!(header.sampling_rate, 16000);
        assert_eq!(header.bits_per_sample, 16);

        match data {
            ::wav::BitDepth::Sixteen(decoded) => {
                assert_eq!(decoded, vec![0, 16383, -16383, 32767, -32767, 8191]);
            }
            other => panic!("unexpected bit depth: {:?}", other),
        }
    }

    #[test]
    fn test_save_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.wav");

        let buffer = AudioBuffer::new(vec![0.5; 10], 1, 16000).unwrap();
        let wav = WavEncoder::encode(&buffer).unwrap();
        wav.save(&path).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), wav.as_bytes());
    }

    #[test]
    fn test_save_to_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("recording.wav");

        let buffer = AudioBuffer::new(Vec::new(), 1, 16000).unwrap();
        let result = WavEncoder::encode(&buffer).unwrap().save(&path);
        assert!(matches!(result, Err(AudioError::Io(_))));
    }
}
