//! Core library for the stimulus presenter.
//!
//! Each module owns one subsystem of a presentation run: parsing the timeline,
//! decoding assets once, mixing sounds for the audio callback, driving the
//! serial trigger box, recording the event log and the frame loop that ties
//! them together. Windowing, decoding and audio output are reached through
//! traits so a front end can supply its own backends.

pub mod assets;
pub mod audio;
pub mod config;
pub mod error;
pub mod record;
pub mod render;
pub mod scheduler;
pub mod timeline;
pub mod trigger;

pub use assets::{AssetDecoder, CacheEntry, LoadSummary, Resource, ResourceCache};
pub use audio::{
    AudioConverter, AudioOutput, AudioSpec, LinearConverter, Mixer, SampleFormat, SoundBuffer,
    TARGET_SPEC,
};
pub use config::{AppConfig, DisplayConfig, TriggerConfig};
pub use error::{PresenterError, Result};
pub use record::{EventKind, EventLog, LogEntry};
pub use render::{Color, Drawable, Rect, Surface, TextureId};
pub use scheduler::{
    show_splash, FrameTiming, InputEvent, InputSource, Markers, RunOutcome, RunSettings,
    RunState, RunStatus, Scheduler,
};
pub use timeline::{Clock, MonotonicClock, Stimulus, StimulusKind, Timeline, UnknownKind};
pub use trigger::{Dlp8, SerialLink, TriggerDevice};
