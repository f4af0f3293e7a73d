//! Headless implementations of the presentation collaborators.

use std::{
    fs::File,
    io::{self, BufRead, BufWriter},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use presenter_core::{
    scheduler::DEFAULT_REFRESH_HZ, AudioOutput, AudioSpec, Color, DisplayConfig, InputEvent,
    InputSource, Mixer, PresenterError, Rect, Result, Surface, TextureId,
};

/// Surface without a window. Counts what would have been drawn and, with
/// vsync on, paces `present` to the refresh rate like a real swap chain.
#[derive(Debug)]
pub struct HeadlessSurface {
    size: (u32, u32),
    refresh_hz: Option<f32>,
    vsync: bool,
    next_vblank: Option<Instant>,
    frames: u64,
    textures_drawn: u64,
}

impl HeadlessSurface {
    pub fn new(display: &DisplayConfig) -> Self {
        Self {
            size: (display.width, display.height),
            refresh_hz: display.refresh_rate_hz,
            vsync: display.vsync,
            next_vblank: None,
            frames: 0,
            textures_drawn: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn textures_drawn(&self) -> u64 {
        self.textures_drawn
    }

    fn frame_period(&self) -> Duration {
        let hz = self
            .refresh_hz
            .filter(|hz| *hz > 0.0)
            .unwrap_or(DEFAULT_REFRESH_HZ);
        Duration::from_secs_f32(1.0 / hz)
    }
}

impl Surface for HeadlessSurface {
    fn refresh_rate_hz(&self) -> Option<f32> {
        self.refresh_hz
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn clear(&mut self, _color: Color) {}

    fn draw_texture(&mut self, _texture: TextureId, _dest: Rect) {
        self.textures_drawn += 1;
    }

    fn draw_line(&mut self, _from: (i32, i32), _to: (i32, i32), _color: Color) {}

    fn present(&mut self) -> Result<()> {
        self.frames += 1;
        if !self.vsync {
            return Ok(());
        }

        let period = self.frame_period();
        let now = Instant::now();
        let vblank = match self.next_vblank {
            Some(at) if at > now => {
                thread::sleep(at - now);
                at
            }
            _ => now,
        };
        self.next_vblank = Some(vblank + period);
        Ok(())
    }
}

/// Keyboard stand-in fed from stdin, one key per line. An empty line is
/// `Return`, `esc` or `q` is `Escape`, anything else is passed through.
pub struct StdinInput {
    events: Receiver<InputEvent>,
}

impl StdinInput {
    pub fn spawn() -> Self {
        let (sender, events) = mpsc::channel();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if sender.send(key_event(&line)).is_err() {
                    break;
                }
            }
        });
        Self { events }
    }
}

fn key_event(line: &str) -> InputEvent {
    let key = match line.trim() {
        "" => "Return".to_string(),
        "esc" | "escape" | "q" => "Escape".to_string(),
        other => other.to_string(),
    };
    InputEvent::KeyDown { key }
}

impl InputSource for StdinInput {
    fn poll(&mut self) -> Option<InputEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    fn wait(&mut self) -> Option<InputEvent> {
        self.events.recv().ok()
    }
}

/// Length of audio produced per pull.
const PULL_MS: u64 = 10;

type Capture = hound::WavWriter<BufWriter<File>>;

/// Audio output without a sound device: pulls from the mixer on its own
/// thread at the stream's real-time rate and records the mix to a WAV file.
#[derive(Debug)]
pub struct PullOutput {
    capture: PathBuf,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl PullOutput {
    pub fn new(capture: PathBuf) -> Self {
        Self {
            capture,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn open_capture(&self, spec: AudioSpec) -> Result<Capture> {
        let path = &self.capture;
        let wav_spec = hound::WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, wav_spec).map_err(|err| {
            PresenterError::msg(format!("cannot create {}: {err}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "capturing audio output");
        Ok(writer)
    }
}

impl AudioOutput for PullOutput {
    fn open(&mut self, spec: AudioSpec, mixer: Arc<Mixer>) -> Result<()> {
        if self.worker.is_some() {
            return Err(PresenterError::msg("audio output already open"));
        }
        let mut capture = self.open_capture(spec)?;
        let mut buffer = vec![0u8; spec.bytes_for_ms(PULL_MS)];
        let period = Duration::from_millis(PULL_MS);

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let worker = thread::Builder::new()
            .name("audio-pull".into())
            .spawn(move || -> Result<()> {
                let mut next = Instant::now();
                while running.load(Ordering::SeqCst) {
                    mixer.render(&mut buffer);
                    for pair in buffer.chunks_exact(2) {
                        capture
                            .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                            .map_err(|err| PresenterError::msg(err.to_string()))?;
                    }
                    next += period;
                    if let Some(wait) = next.checked_duration_since(Instant::now()) {
                        thread::sleep(wait);
                    }
                }
                capture
                    .finalize()
                    .map_err(|err| PresenterError::msg(err.to_string()))
            })?;

        self.worker = Some(worker);
        tracing::debug!(?spec, "audio output opened");
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(worker) = self.worker.take() else {
            return;
        };
        match worker.join() {
            Ok(Ok(())) => tracing::debug!("audio output closed"),
            Ok(Err(err)) => tracing::warn!("audio output failed: {err}"),
            Err(_) => tracing::warn!("audio thread panicked"),
        }
    }
}

impl Drop for PullOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use presenter_core::{SoundBuffer, TARGET_SPEC};

    use super::*;

    #[test]
    fn stdin_lines_map_to_keys() {
        assert_eq!(key_event(""), InputEvent::KeyDown { key: "Return".into() });
        assert_eq!(key_event(" q "), InputEvent::KeyDown { key: "Escape".into() });
        assert_eq!(key_event("esc"), InputEvent::KeyDown { key: "Escape".into() });
        assert_eq!(key_event("Space"), InputEvent::KeyDown { key: "Space".into() });
    }

    #[test]
    fn vsync_paces_presents() {
        let display = DisplayConfig {
            vsync: true,
            refresh_rate_hz: Some(100.0),
            ..DisplayConfig::default()
        };
        let mut surface = HeadlessSurface::new(&display);
        let start = Instant::now();
        for _ in 0..4 {
            surface.present().unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(29));
        assert_eq!(surface.frames(), 4);
    }

    #[test]
    fn pull_output_drains_and_captures_the_mixer() {
        let path = std::env::temp_dir().join(format!("presenter-capture-{}.wav", std::process::id()));
        let mixer = Arc::new(Mixer::new());
        mixer.play(Arc::new(SoundBuffer::from_i16(TARGET_SPEC, &[500; 64])));

        let mut output = PullOutput::new(path.clone());
        output.open(TARGET_SPEC, Arc::clone(&mixer)).unwrap();
        thread::sleep(Duration::from_millis(50));
        output.close();

        assert_eq!(mixer.active_voices(), 0);
        let reader = hound::WavReader::open(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(reader.spec().channels, 2);
        assert!(reader.len() >= 64);
    }
}
