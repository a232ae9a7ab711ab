//! # Streaming Playback Example
//!
//! Plays an Ogg Vorbis file into a null device, driving the output the way a
//! host audio callback would, and prints the published snapshot once a second.
//!
//! Run with:
//! `cargo run --example playback_demo --package core-playback -- music.ogg [loop_start loop_end]`

use core_playback::{
    AudioRenderSource, AudioSource, LoopRegion, PlaybackError, PlaybackHandle, PlaybackState,
    StreamingConfig,
};
use core_runtime::logging::{init_logging, LoggingConfig};
use std::time::{Duration, Instant};

const CALLBACK_FRAMES: usize = 512;
const MAX_RUNTIME: Duration = Duration::from_secs(30);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LoggingConfig::default().with_filter("core_playback=debug"))?;

    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or("usage: playback_demo <file.ogg> [loop_start loop_end]")?;
    let region = match (args.next(), args.next()) {
        (Some(start), Some(end)) => Some(LoopRegion::new(start.parse()?, end.parse()?)?),
        _ => None,
    };

    let (handle, mut output) = PlaybackHandle::spawn(StreamingConfig::default())?;
    handle.open(AudioSource::file(&path), false)?;
    handle.set_loop_region(region)?;

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut buf = vec![0.0f32; CALLBACK_FRAMES * 8];

    loop {
        let channels = usize::from(output.channels().max(1));
        let rate = output.sample_rate().max(1);
        output.render(&mut buf[..CALLBACK_FRAMES * channels]);

        let snapshot = handle.snapshot();
        if last_report.elapsed() >= Duration::from_secs(1) {
            println!("{}", serde_json::to_string(&*snapshot)?);
            last_report = Instant::now();
        }

        match snapshot.state {
            PlaybackState::Finished => break,
            PlaybackState::Error => {
                return Err(Box::new(PlaybackError::Internal(
                    snapshot.last_error.clone().unwrap_or_default(),
                )))
            }
            _ => {}
        }
        if started.elapsed() > MAX_RUNTIME {
            handle.stop()?;
            break;
        }

        // Pace like a device pulling CALLBACK_FRAMES at the stream rate
        std::thread::sleep(Duration::from_secs_f64(
            CALLBACK_FRAMES as f64 / f64::from(rate),
        ));
    }

    let snapshot = handle.snapshot();
    println!(
        "done: position {} loops {} underruns {}",
        snapshot.position_sample, snapshot.loops_completed, snapshot.stats.underruns
    );
    Ok(())
}
