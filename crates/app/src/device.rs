//! Audio output on the system's default sound device.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use presenter_core::{AudioOutput, AudioSpec, Mixer, PresenterError, Result, SampleFormat};

/// Plays the mix through one `cpal` output stream on the default device.
/// The stream's data callback pulls straight from the mixer.
#[derive(Default)]
pub struct DeviceOutput {
    stream: Option<cpal::Stream>,
}

impl DeviceOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

fn stream_config(spec: AudioSpec) -> Result<cpal::StreamConfig> {
    if spec.format != SampleFormat::S16 {
        return Err(PresenterError::msg(format!(
            "cannot open a {:?} output stream, only S16 is supported",
            spec.format
        )));
    }
    Ok(cpal::StreamConfig {
        channels: spec.channels,
        sample_rate: cpal::SampleRate(spec.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    })
}

impl AudioOutput for DeviceOutput {
    fn open(&mut self, spec: AudioSpec, mixer: Arc<Mixer>) -> Result<()> {
        if self.stream.is_some() {
            return Err(PresenterError::msg("audio output already open"));
        }
        let config = stream_config(spec)?;

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            PresenterError::msg(format!(
                "no default audio output device ({} host)",
                host.id().name()
            ))
        })?;
        let name = device.name().unwrap_or_else(|_| "unnamed device".into());

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| mixer.render_samples(data),
                |err| tracing::warn!("audio stream error: {err}"),
                None,
            )
            .map_err(|err| PresenterError::msg(format!("cannot open audio stream on {name}: {err}")))?;
        stream
            .play()
            .map_err(|err| PresenterError::msg(format!("cannot start audio stream on {name}: {err}")))?;

        tracing::info!(device = %name, ?spec, "audio output opened");
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        if let Err(err) = stream.pause() {
            tracing::debug!("pausing audio stream: {err}");
        }
        drop(stream);
        tracing::debug!("audio output closed");
    }
}
