//! # Sample Format Converter
//!
//! Converts decoded audio buffers into interleaved `f32` frames in Vorbis
//! channel order.

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::conv::IntoSample;
use symphonia::core::sample::Sample;
use tracing::warn;

/// Buffer plane holding each Vorbis channel, indexed by channel count.
///
/// The DSP backend stores channels in its own speaker-position order; this
/// undoes that so interleaved output follows the stream's declared mapping
/// (Vorbis I, section 4.3.9).
const VORBIS_PLANE_ORDER: [&[usize]; 8] = [
    &[0],
    &[0, 1],
    &[0, 2, 1],
    &[0, 1, 2, 3],
    &[0, 2, 1, 3, 4],
    &[0, 2, 1, 4, 5, 3],
    &[0, 2, 1, 5, 6, 4, 3],
    &[0, 2, 1, 6, 7, 4, 5, 3],
];

/// Plane index carrying Vorbis channel `channel` of a `channels`-channel stream.
pub fn plane_for_channel(channels: usize, channel: usize) -> usize {
    match VORBIS_PLANE_ORDER.get(channels.wrapping_sub(1)) {
        Some(order) if channel < order.len() => order[channel],
        _ => channel,
    }
}

/// Sample converter that normalizes audio to f32 interleaved format.
pub struct SampleConverter;

impl SampleConverter {
    /// Append the buffer's frames to `out`, interleaved in Vorbis channel order.
    ///
    /// Integer formats are normalized to `[-1.0, 1.0]`. Returns the number of
    /// frames appended.
    pub fn append_interleaved(buffer: &AudioBufferRef<'_>, out: &mut Vec<f32>) -> usize {
        match buffer {
            AudioBufferRef::F32(buf) => Self::interleave(buf, out, |s: f32| s),
            AudioBufferRef::F64(buf) => Self::interleave(buf, out, |s: f64| s.into_sample()),
            AudioBufferRef::S32(buf) => Self::interleave(buf, out, |s: i32| s.into_sample()),
            AudioBufferRef::S24(buf) => Self::interleave(buf, out, |s| IntoSample::into_sample(s)),
            AudioBufferRef::S16(buf) => Self::interleave(buf, out, |s: i16| s.into_sample()),
            AudioBufferRef::S8(buf) => Self::interleave(buf, out, |s: i8| s.into_sample()),
            AudioBufferRef::U32(buf) => Self::interleave(buf, out, |s: u32| s.into_sample()),
            AudioBufferRef::U24(buf) => Self::interleave(buf, out, |s| IntoSample::into_sample(s)),
            AudioBufferRef::U16(buf) => Self::interleave(buf, out, |s: u16| s.into_sample()),
            AudioBufferRef::U8(buf) => Self::interleave(buf, out, |s: u8| s.into_sample()),
        }
    }

    fn interleave<T>(buf: &AudioBuffer<T>, out: &mut Vec<f32>, convert: fn(T) -> f32) -> usize
    where
        T: Sample + Copy,
    {
        let channels = buf.spec().channels.count();
        let frames = buf.frames();
        out.reserve(frames * channels);

        let planes: Vec<&[T]> = (0..channels)
            .map(|ch| buf.chan(plane_for_channel(channels, ch)))
            .collect();

        for frame in 0..frames {
            for plane in &planes {
                out.push(convert(plane[frame]));
            }
        }

        frames
    }

    /// Count samples outside `[-1.0, 1.0]`, warning when there are any.
    pub fn validate_samples(samples: &[f32]) -> usize {
        let clipped = samples.iter().filter(|&&s| !(-1.0..=1.0).contains(&s)).count();

        if clipped > 0 {
            warn!(
                clipped,
                percent = (clipped as f64 / samples.len() as f64) * 100.0,
                "Decoded samples out of range"
            );
        }

        clipped
    }

    /// Clamp samples to `[-1.0, 1.0]`.
    pub fn clamp_samples(samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}
