use std::{
    ops::Range,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};

use crate::{PresenterError, Result};

/// Number of sounds that can play at the same time.
pub const MAX_VOICES: usize = 16;

/// Size of the mixing scratch buffer, in bytes.
pub const SCRATCH_BYTES: usize = 4096;

const SCRATCH_SAMPLES: usize = SCRATCH_BYTES / 2;

/// Format every sound is normalised to at load time and the output stream runs at.
pub const TARGET_SPEC: AudioSpec = AudioSpec {
    format: SampleFormat::S16,
    channels: 2,
    sample_rate: 44_100,
};

/// Encoding of a single PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S16,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::F32 => 4,
        }
    }
}

/// Describes interleaved PCM data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioSpec {
    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// Bytes needed for `millis` of audio in this format.
    pub fn bytes_for_ms(&self, millis: u64) -> usize {
        let frames = self.sample_rate as u64 * millis / 1000;
        frames as usize * self.bytes_per_frame()
    }
}

/// Decoded PCM bytes (little-endian, interleaved) together with their format.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundBuffer {
    spec: AudioSpec,
    bytes: Vec<u8>,
}

impl SoundBuffer {
    pub fn new(spec: AudioSpec, bytes: Vec<u8>) -> Self {
        Self { spec, bytes }
    }

    pub fn from_i16(spec: AudioSpec, samples: &[i16]) -> Self {
        let bytes = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self {
            spec: AudioSpec {
                format: SampleFormat::S16,
                ..spec
            },
            bytes,
        }
    }

    pub fn from_f32(spec: AudioSpec, samples: &[f32]) -> Self {
        let bytes = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self {
            spec: AudioSpec {
                format: SampleFormat::F32,
                ..spec
            },
            bytes,
        }
    }

    pub fn spec(&self) -> AudioSpec {
        self.spec
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len_bytes(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len_samples(&self) -> usize {
        self.bytes.len() / self.spec.format.bytes_per_sample()
    }

    pub fn is_target_format(&self) -> bool {
        self.spec == TARGET_SPEC
    }

    /// Views `range` (byte offsets) as 16-bit samples. The range is clamped to
    /// the buffer and a trailing odd byte is ignored.
    pub fn s16_samples(&self, range: Range<usize>) -> S16Samples<'_> {
        let end = range.end.min(self.bytes.len());
        let start = range.start.min(end);
        S16Samples {
            chunks: self.bytes[start..end].chunks_exact(2),
        }
    }

    /// Every sample of the buffer as `f32` in `[-1.0, 1.0]`, regardless of format.
    pub fn samples_f32(&self) -> Vec<f32> {
        match self.spec.format {
            SampleFormat::U8 => self
                .bytes
                .iter()
                .map(|&b| (b as f32 - 128.0) / 128.0)
                .collect(),
            SampleFormat::S16 => self
                .s16_samples(0..self.bytes.len())
                .map(|s| s as f32 / 32768.0)
                .collect(),
            SampleFormat::F32 => self
                .bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        }
    }
}

/// Iterator over little-endian 16-bit samples of a [`SoundBuffer`].
#[derive(Debug, Clone)]
pub struct S16Samples<'a> {
    chunks: std::slice::ChunksExact<'a, u8>,
}

impl Iterator for S16Samples<'_> {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        self.chunks.next().map(|c| i16::from_le_bytes([c[0], c[1]]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for S16Samples<'_> {}

/// Converts decoded sounds into the output format.
pub trait AudioConverter {
    fn convert(&self, source: &SoundBuffer, target: AudioSpec) -> Result<SoundBuffer>;
}

/// Channel up/down-mixing (mono and stereo) and linear-interpolation resampling
/// to signed 16-bit output.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearConverter;

impl AudioConverter for LinearConverter {
    fn convert(&self, source: &SoundBuffer, target: AudioSpec) -> Result<SoundBuffer> {
        let src = source.spec();
        if target.format != SampleFormat::S16 {
            return Err(PresenterError::msg(format!(
                "cannot convert to {:?}, only S16 output is supported",
                target.format
            )));
        }
        if !matches!(src.channels, 1 | 2) || !matches!(target.channels, 1 | 2) {
            return Err(PresenterError::msg(format!(
                "unsupported channel layout {} -> {}",
                src.channels, target.channels
            )));
        }
        if src.sample_rate == 0 || target.sample_rate == 0 {
            return Err(PresenterError::msg("sample rate must be positive"));
        }

        let samples = source.samples_f32();
        let in_channels = src.channels as usize;
        let frames: Vec<[f32; 2]> = samples
            .chunks_exact(in_channels)
            .map(|frame| match frame {
                [mono] => [*mono, *mono],
                [left, right] => [*left, *right],
                _ => [0.0, 0.0],
            })
            .collect();

        let out_frames = (frames.len() as u64 * target.sample_rate as u64
            / src.sample_rate as u64) as usize;
        let step = src.sample_rate as f64 / target.sample_rate as f64;
        let out_channels = target.channels as usize;

        let mut out = Vec::with_capacity(out_frames * out_channels);
        for i in 0..out_frames {
            let pos = i as f64 * step;
            let base = pos.floor() as usize;
            let frac = (pos - base as f64) as f32;
            let a = frames.get(base).copied().unwrap_or([0.0, 0.0]);
            let b = frames.get(base + 1).copied().unwrap_or(a);
            let left = a[0] + (b[0] - a[0]) * frac;
            let right = a[1] + (b[1] - a[1]) * frac;
            if out_channels == 1 {
                out.push(to_i16((left + right) * 0.5));
            } else {
                out.push(to_i16(left));
                out.push(to_i16(right));
            }
        }

        Ok(SoundBuffer::from_i16(target, &out))
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[derive(Debug, Clone)]
struct Voice {
    buffer: Arc<SoundBuffer>,
    /// Byte offset of the next sample to mix.
    cursor: usize,
}

/// Cursor after mixing `mixed` more bytes, or `None` once the voice has
/// reached the end of its `len`-byte buffer.
fn advance(cursor: usize, mixed: usize, len: usize) -> Option<usize> {
    let next = cursor.saturating_add(mixed);
    (next < len).then_some(next)
}

/// Fixed-capacity additive mixer shared between the presentation loop
/// ([`Mixer::play`]) and the audio backend's pull callback ([`Mixer::render`]).
#[derive(Debug, Default)]
pub struct Mixer {
    slots: Mutex<[Option<Voice>; MAX_VOICES]>,
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `buffer` in the first free slot. Returns `false`, leaving every
    /// slot untouched, when all voices are busy; the sound is dropped, not queued.
    pub fn play(&self, buffer: Arc<SoundBuffer>) -> bool {
        let mut slots = self.lock();
        match slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(Voice { buffer, cursor: 0 });
                true
            }
            None => false,
        }
    }

    /// Fills `out` with the mix of every active voice as interleaved
    /// little-endian 16-bit samples.
    pub fn render(&self, out: &mut [u8]) {
        let mut scratch = [0i16; SCRATCH_SAMPLES];
        for chunk in out.chunks_mut(SCRATCH_BYTES) {
            let samples = &mut scratch[..chunk.len() / 2];
            samples.fill(0);
            self.mix_into(samples);

            for (dst, sample) in chunk.chunks_exact_mut(2).zip(samples.iter()) {
                dst.copy_from_slice(&sample.to_le_bytes());
            }
            if chunk.len() % 2 == 1 {
                if let Some(last) = chunk.last_mut() {
                    *last = 0;
                }
            }
        }
    }

    /// Same mix as [`Mixer::render`] for backends that take native samples.
    pub fn render_samples(&self, out: &mut [i16]) {
        for chunk in out.chunks_mut(SCRATCH_SAMPLES) {
            chunk.fill(0);
            self.mix_into(chunk);
        }
    }

    fn mix_into(&self, scratch: &mut [i16]) {
        let chunk_bytes = scratch.len() * 2;
        let mut slots = self.lock();
        for slot in slots.iter_mut() {
            let Some(voice) = slot.as_mut() else {
                continue;
            };

            let cursor = voice.cursor;
            let len = voice.buffer.len_bytes();
            let to_mix = chunk_bytes.min(len.saturating_sub(cursor));

            for (dst, src) in scratch
                .iter_mut()
                .zip(voice.buffer.s16_samples(cursor..cursor + to_mix))
            {
                *dst = dst.saturating_add(src);
            }

            match advance(cursor, to_mix, len) {
                Some(next) => voice.cursor = next,
                None => *slot = None,
            }
        }
    }

    /// Number of slots currently playing.
    pub fn active_voices(&self) -> usize {
        self.lock().iter().filter(|slot| slot.is_some()).count()
    }

    /// Silences every voice.
    pub fn stop_all(&self) {
        self.lock().iter_mut().for_each(|slot| *slot = None);
    }

    /// The slot table stays consistent even if a holder panicked, so a
    /// poisoned lock is recovered rather than propagated into the audio thread.
    fn lock(&self) -> MutexGuard<'_, [Option<Voice>; MAX_VOICES]> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Platform audio output that periodically pulls samples from a [`Mixer`].
pub trait AudioOutput {
    /// Opens the device and starts pulling. Failure is fatal for a run.
    fn open(&mut self, spec: AudioSpec, mixer: Arc<Mixer>) -> Result<()>;
    fn close(&mut self);
}
