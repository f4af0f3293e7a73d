//! Frame-synchronous presentation loop.
//!
//! Each frame drains input, fires at most one stimulus whose onset falls
//! within the lookahead window, expires the visible stimulus, renders and
//! presents. Visual onsets are timestamped after `present` returns, which with
//! vsync enabled is the moment the frame reached the display.

use std::sync::Arc;

use crate::{
    assets::Resource,
    audio::Mixer,
    config::AppConfig,
    record::{EventKind, EventLog},
    render::{centered_rect, draw_fixation_cross, Color, Drawable, Surface},
    timeline::{Clock, Stimulus, StimulusKind, Timeline},
    trigger::{TriggerDevice, PULSE_MS},
    Result,
};

/// Time kept on screen (and waited for) after the last stimulus ends.
pub const END_MARGIN_MS: u64 = 500;

/// Refresh rate assumed when the display does not report one.
pub const DEFAULT_REFRESH_HZ: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Finished,
    Aborted,
}

/// Frame period and firing lookahead derived from the refresh rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub frame_period_ms: u64,
    pub lookahead_ms: u64,
}

impl FrameTiming {
    pub fn from_refresh_rate(hz: Option<f32>) -> Self {
        let hz = hz.filter(|hz| *hz > 0.0).unwrap_or(DEFAULT_REFRESH_HZ);
        let frame_period_ms = (1000.0 / hz).floor() as u64;
        Self {
            frame_period_ms,
            lookahead_ms: frame_period_ms / 2,
        }
    }
}

/// Mutable progress of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState {
    /// Index of the first stimulus that has not fired yet.
    pub next_unfired: usize,
    /// Index of the stimulus currently on screen.
    pub visible: Option<usize>,
    pub visible_expiry_ms: u64,
    pub start_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub scale_factor: f32,
    pub show_fixation: bool,
    pub vsync: bool,
    pub background: Color,
    pub fixation_color: Color,
    pub abort_key: String,
    pub min_total_duration_ms: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl RunSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            scale_factor: config.display.scale_factor,
            show_fixation: config.display.show_fixation,
            vsync: config.display.vsync,
            background: config.display.background,
            fixation_color: config.display.fixation_color,
            abort_key: config.abort_key.clone(),
            min_total_duration_ms: config.min_total_duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// The window was closed or the input stream asked to stop.
    Quit,
    KeyDown { key: String },
}

pub trait InputSource {
    /// Next pending event, without blocking.
    fn poll(&mut self) -> Option<InputEvent>;
    /// Blocks for the next event. `None` means no more input will arrive.
    fn wait(&mut self) -> Option<InputEvent>;
}

/// Trigger output used by a run. The first failed write disables it.
pub struct Markers {
    device: Option<Box<dyn TriggerDevice>>,
}

impl Markers {
    pub fn new(device: Option<Box<dyn TriggerDevice>>) -> Self {
        Self { device }
    }

    pub fn disabled() -> Self {
        Self { device: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.device.is_some()
    }

    pub fn set(&mut self, lines: &str) {
        self.apply(|device| device.set(lines));
    }

    pub fn unset(&mut self, lines: &str) {
        self.apply(|device| device.unset(lines));
    }

    /// Raises `lines`, holds them for `ms`, then lowers them.
    pub fn pulse(&mut self, lines: &str, ms: u64) {
        self.apply(|device| {
            device.set(lines)?;
            device.delay(ms);
            device.unset(lines)
        });
    }

    fn apply(&mut self, op: impl FnOnce(&mut dyn TriggerDevice) -> Result<()>) {
        let Some(device) = self.device.as_deref_mut() else {
            return;
        };
        if let Err(err) = op(device) {
            tracing::warn!("trigger device failed, markers disabled for the rest of the run: {err}");
            self.device = None;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub state: RunState,
}

/// Drives one presentation of a timeline.
pub struct Scheduler<'a> {
    timeline: &'a Timeline,
    resources: &'a [Resource],
    mixer: Arc<Mixer>,
    markers: Markers,
    settings: RunSettings,
    status: RunStatus,
    state: RunState,
}

impl<'a> Scheduler<'a> {
    /// `resources` holds one entry per timeline position, as returned by
    /// [`crate::ResourceCache::load`]. Positions without an entry are skipped
    /// like a failed load.
    pub fn new(
        timeline: &'a Timeline,
        resources: &'a [Resource],
        mixer: Arc<Mixer>,
        settings: RunSettings,
    ) -> Self {
        if resources.len() < timeline.len() {
            tracing::warn!(
                stimuli = timeline.len(),
                resources = resources.len(),
                "fewer resources than stimuli, the rest will be skipped"
            );
        }
        Self {
            timeline,
            resources,
            mixer,
            markers: Markers::disabled(),
            settings,
            status: RunStatus::Idle,
            state: RunState::default(),
        }
    }

    pub fn with_trigger(mut self, device: Box<dyn TriggerDevice>) -> Self {
        self.markers = Markers::new(Some(device));
        self
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run length: the end of the last stimulus plus [`END_MARGIN_MS`], or the
    /// configured minimum if that is longer.
    pub fn total_duration_ms(&self) -> u64 {
        self.timeline
            .total_duration_ms(END_MARGIN_MS)
            .max(self.settings.min_total_duration_ms)
    }

    /// Presents the whole timeline. A scheduler runs once; later calls return
    /// the outcome of the first run without doing anything.
    pub fn run(
        &mut self,
        clock: &dyn Clock,
        surface: &mut dyn Surface,
        input: &mut dyn InputSource,
        log: &mut EventLog,
    ) -> Result<RunOutcome> {
        if self.status != RunStatus::Idle {
            return Ok(self.outcome());
        }

        let timing = FrameTiming::from_refresh_rate(surface.refresh_rate_hz());
        let total_ms = self.total_duration_ms();
        self.state = RunState {
            start_ms: clock.now_ms(),
            ..RunState::default()
        };
        self.status = RunStatus::Running;
        tracing::info!(
            stimuli = self.timeline.len(),
            frame_period_ms = timing.frame_period_ms,
            lookahead_ms = timing.lookahead_ms,
            total_ms,
            "presentation started"
        );

        while self.status == RunStatus::Running {
            self.frame(clock, surface, input, log, timing, total_ms)?;
        }

        tracing::info!(status = ?self.status, events = log.len(), "presentation ended");
        Ok(self.outcome())
    }

    fn frame(
        &mut self,
        clock: &dyn Clock,
        surface: &mut dyn Surface,
        input: &mut dyn InputSource,
        log: &mut EventLog,
        timing: FrameTiming,
        total_ms: u64,
    ) -> Result<()> {
        let elapsed = self.elapsed(clock);
        tracing::trace!(elapsed, "frame");

        while let Some(event) = input.poll() {
            match event {
                InputEvent::Quit => self.status = RunStatus::Aborted,
                InputEvent::KeyDown { key } if key == self.settings.abort_key => {
                    self.status = RunStatus::Aborted
                }
                InputEvent::KeyDown { key } => {
                    log.log(elapsed, elapsed, EventKind::Response, key)
                }
            }
        }
        if self.status == RunStatus::Aborted {
            tracing::info!(elapsed, "presentation aborted");
            return Ok(());
        }

        let mut pending_onset = None;
        if let Some(stimulus) = self.timeline.get(self.state.next_unfired) {
            if elapsed + timing.lookahead_ms >= stimulus.onset_ms {
                pending_onset = self.fire(self.state.next_unfired, elapsed, log);
                self.state.next_unfired += 1;
                tracing::debug!(
                    "stimulus {}/{}",
                    self.state.next_unfired,
                    self.timeline.len()
                );
            }
        }

        if let Some(index) = self.state.visible {
            if elapsed >= self.state.visible_expiry_ms {
                if pending_onset.take() == Some(index) {
                    // Expired before it was ever presented.
                    self.log_onset(index, elapsed, log);
                }
                self.end_visible(index, elapsed, log);
            }
        }

        let done = self.state.next_unfired >= self.timeline.len()
            && self.state.visible.is_none()
            && elapsed >= total_ms;

        self.render(surface)?;

        if let Some(index) = pending_onset {
            let actual = self.elapsed(clock);
            self.log_onset(index, actual, log);
            self.state.visible_expiry_ms = actual + self.stimulus(index).duration_ms;
        }

        if done {
            self.status = RunStatus::Finished;
        } else if !self.settings.vsync {
            clock.sleep_ms(1);
        }
        Ok(())
    }

    /// Starts stimulus `index`. Returns the index when a visual onset still
    /// has to be logged after presentation.
    fn fire(&mut self, index: usize, elapsed: u64, log: &mut EventLog) -> Option<usize> {
        let stimulus = self.stimulus(index);
        let resources: &'a [Resource] = self.resources;
        let resource = resources.get(index);

        match stimulus.kind {
            StimulusKind::Image | StimulusKind::Text => {
                if resource.and_then(|r| r.drawable).is_none() {
                    tracing::debug!(reference = %stimulus.reference, "no drawable, skipping");
                    return None;
                }
                if let Some(previous) = self.state.visible {
                    self.end_visible(previous, elapsed, log);
                }
                self.state.visible = Some(index);
                self.state.visible_expiry_ms = elapsed + stimulus.duration_ms;
                self.markers.set(stimulus.kind.trigger_line());
                Some(index)
            }
            StimulusKind::Sound => {
                let Some(sound) = resource.and_then(|r| r.sound.as_ref()) else {
                    tracing::debug!(reference = %stimulus.reference, "no audio, skipping");
                    return None;
                };
                if self.mixer.play(Arc::clone(sound)) {
                    log.log(
                        stimulus.onset_ms,
                        elapsed,
                        stimulus.kind.onset_event(),
                        stimulus.reference.as_str(),
                    );
                    self.markers.pulse(stimulus.kind.trigger_line(), PULSE_MS);
                } else {
                    tracing::debug!(reference = %stimulus.reference, "all voices busy, sound dropped");
                }
                None
            }
        }
    }

    fn end_visible(&mut self, index: usize, elapsed: u64, log: &mut EventLog) {
        let stimulus = self.stimulus(index);
        if let Some(kind) = stimulus.kind.offset_event() {
            log.log(stimulus.offset_ms(), elapsed, kind, stimulus.reference.as_str());
        }
        self.markers.unset(stimulus.kind.trigger_line());
        self.state.visible = None;
    }

    fn log_onset(&self, index: usize, actual: u64, log: &mut EventLog) {
        let stimulus = self.stimulus(index);
        log.log(
            stimulus.onset_ms,
            actual,
            stimulus.kind.onset_event(),
            stimulus.reference.as_str(),
        );
    }

    fn render(&self, surface: &mut dyn Surface) -> Result<()> {
        surface.clear(self.settings.background);
        let drawable = self
            .state
            .visible
            .and_then(|index| self.resources.get(index))
            .and_then(|resource| resource.drawable);
        match drawable {
            Some(drawable) => {
                let dest = centered_rect(&drawable, self.settings.scale_factor, surface.size());
                surface.draw_texture(drawable.id, dest);
            }
            None if self.settings.show_fixation => {
                draw_fixation_cross(surface, self.settings.fixation_color)
            }
            None => {}
        }
        surface.present()
    }

    fn stimulus(&self, index: usize) -> &'a Stimulus {
        let timeline: &'a Timeline = self.timeline;
        &timeline.stimuli()[index]
    }

    fn elapsed(&self, clock: &dyn Clock) -> u64 {
        clock.now_ms().saturating_sub(self.state.start_ms)
    }

    fn outcome(&self) -> RunOutcome {
        RunOutcome {
            status: self.status,
            state: self.state,
        }
    }
}

/// Shows a centred splash screen and waits for a key. Returns `false` if the
/// user quit instead.
pub fn show_splash(
    surface: &mut dyn Surface,
    input: &mut dyn InputSource,
    drawable: &Drawable,
    settings: &RunSettings,
) -> Result<bool> {
    surface.clear(settings.background);
    let dest = centered_rect(drawable, settings.scale_factor, surface.size());
    surface.draw_texture(drawable.id, dest);
    surface.present()?;

    match input.wait() {
        Some(InputEvent::Quit) => Ok(false),
        Some(InputEvent::KeyDown { key }) => {
            tracing::debug!(key = %key, "splash dismissed");
            Ok(true)
        }
        None => Ok(true),
    }
}
