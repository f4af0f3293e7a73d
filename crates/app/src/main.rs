mod backend;
mod decode;
#[cfg(feature = "device-audio")]
mod device;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{Local, NaiveDateTime};
use clap::{Args, Parser, Subcommand};
use presenter_core::{
    show_splash, AppConfig, AssetDecoder, AudioOutput, Color, Dlp8, EventLog, InputSource, Mixer,
    MonotonicClock, PresenterError, ResourceCache, Result, RunSettings, RunStatus, Scheduler,
    Surface, Timeline, TriggerDevice, TARGET_SPEC,
};
use tracing_subscriber::EnvFilter;

use crate::{
    backend::{HeadlessSurface, PullOutput, StdinInput},
    decode::FileDecoder,
};

/// Timeline read when none is given on the command line.
const DEFAULT_TIMELINE: &str = "experiment.csv";

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_presentation(&args),
        Commands::Check {
            timeline,
            stimuli_dir,
            font,
        } => run_check(&timeline, stimuli_dir.as_deref(), font),
        Commands::Ping { device, baud } => run_ping(&device, baud),
    }
}

fn run_presentation(args: &RunArgs) -> Result<()> {
    let mut config = match &args.preset {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    args.apply(&mut config);

    let timeline_path = args
        .timeline
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TIMELINE));
    let timeline = Timeline::load(&timeline_path)?;
    let assets_dir = assets_dir(&timeline_path, config.stimuli_dir.as_deref());
    tracing::info!(assets = %assets_dir.display(), "resolving stimuli");

    let font = config.font.clone().or_else(decode::default_font_path);
    let decoder = FileDecoder::new(font.as_deref(), config.font_size, config.text_color);
    let mut cache = ResourceCache::new(decoder);
    let resources = cache.load(&timeline, &assets_dir);

    let mut surface = HeadlessSurface::new(&config.display);
    let mut input = StdinInput::spawn();
    let mixer = Arc::new(Mixer::new());
    let mut output = audio_output(args.audio_capture.as_deref())?;
    output.open(TARGET_SPEC, Arc::clone(&mixer))?;

    let settings = RunSettings::from_config(&config);
    let mut scheduler = Scheduler::new(&timeline, &resources, Arc::clone(&mixer), settings.clone());
    if let Some(device) = open_trigger(&config) {
        scheduler = scheduler.with_trigger(device);
    }

    if let Some(path) = &config.start_splash {
        if !splash(&mut cache, &mut surface, &mut input, path, &settings)? {
            tracing::info!("quit at start screen");
            output.close();
            return Ok(());
        }
    }

    let mut log = EventLog::new();
    let clock = MonotonicClock::start();
    let outcome = scheduler.run(&clock, &mut surface, &mut input, &mut log)?;

    if outcome.status == RunStatus::Finished {
        if let Some(path) = &config.end_splash {
            splash(&mut cache, &mut surface, &mut input, path, &settings)?;
        }
    }

    mixer.stop_all();
    output.close();
    tracing::info!(
        frames = surface.frames(),
        textures = surface.textures_drawn(),
        "display closed"
    );

    let path = timestamped_path(&config.output, Local::now().naive_local());
    if let Err(err) = log.save(&path) {
        tracing::error!(
            path = %path.display(),
            entries = log.len(),
            "failed to save event log: {err}"
        );
        return Err(err);
    }
    Ok(())
}

fn run_check(timeline_path: &Path, stimuli_dir: Option<&Path>, font: Option<PathBuf>) -> Result<()> {
    let timeline = Timeline::load(timeline_path)?;
    let font = font.or_else(decode::default_font_path);
    let mut cache = ResourceCache::new(FileDecoder::new(
        font.as_deref(),
        AppConfig::default().font_size,
        Color::WHITE,
    ));
    cache.load(&timeline, &assets_dir(timeline_path, stimuli_dir));

    let summary = cache.summary();
    println!(
        "{} stimuli, {} images, {} sounds, {} texts, {} failed, ~{:.1} MB",
        timeline.len(),
        summary.images,
        summary.sounds,
        summary.texts,
        summary.failed,
        summary.estimated_bytes as f64 / (1024.0 * 1024.0)
    );
    println!(
        "run length {} ms",
        timeline.total_duration_ms(presenter_core::scheduler::END_MARGIN_MS)
    );
    Ok(())
}

fn run_ping(device: &str, baud: u32) -> Result<()> {
    let mut dlp = Dlp8::open_serial(device, baud)?;
    if !dlp.ping() {
        return Err(PresenterError::Trigger(format!("{device} stopped answering")));
    }
    let states = dlp.read_lines()?;
    println!("{device}: alive, lines {}", String::from_utf8_lossy(&states));
    Ok(())
}

/// A trigger box that cannot be opened is not fatal; the run continues
/// without markers.
/// The sound device, or a WAV capture when one is requested.
fn audio_output(capture: Option<&Path>) -> Result<Box<dyn AudioOutput>> {
    match capture {
        Some(path) => Ok(Box::new(PullOutput::new(path.to_path_buf()))),
        None => device_output(),
    }
}

#[cfg(feature = "device-audio")]
fn device_output() -> Result<Box<dyn AudioOutput>> {
    Ok(Box::new(device::DeviceOutput::new()))
}

#[cfg(not(feature = "device-audio"))]
fn device_output() -> Result<Box<dyn AudioOutput>> {
    Err(PresenterError::msg(
        "built without audio device support, pass --audio-capture to record instead",
    ))
}

fn open_trigger(config: &AppConfig) -> Option<Box<dyn TriggerDevice>> {
    let path = config.trigger.device.as_deref()?;
    match Dlp8::open_serial(path, config.trigger.baud) {
        Ok(device) => Some(Box::new(device)),
        Err(err) => {
            tracing::warn!(path, "continuing without trigger device: {err}");
            None
        }
    }
}

fn splash<D: AssetDecoder>(
    cache: &mut ResourceCache<D>,
    surface: &mut dyn Surface,
    input: &mut dyn InputSource,
    path: &Path,
    settings: &RunSettings,
) -> Result<bool> {
    let drawable = match cache.decoder_mut().decode_image(path) {
        Ok(drawable) => drawable,
        Err(err) => {
            tracing::warn!(path = %path.display(), "skipping splash screen: {err}");
            return Ok(true);
        }
    };
    let proceed = show_splash(surface, input, &drawable, settings);
    cache.decoder_mut().release(drawable.id);
    proceed
}

/// Directory stimulus references are resolved against.
fn assets_dir(timeline: &Path, stimuli_dir: Option<&Path>) -> PathBuf {
    let base = timeline
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match stimuli_dir {
        Some(dir) => base.join(dir),
        None => base.to_path_buf(),
    }
}

/// `results.csv` becomes `results_20250101-093000.csv`.
fn timestamped_path(path: &Path, now: NaiveDateTime) -> PathBuf {
    let stem = path
        .file_stem()
        .map_or_else(|| "results".into(), |stem| stem.to_string_lossy());
    let ext = path
        .extension()
        .map_or_else(|| "csv".into(), |ext| ext.to_string_lossy());
    path.with_file_name(format!("{stem}_{}.{ext}", now.format("%Y%m%d-%H%M%S")))
}

fn parse_resolution(value: &str) -> std::result::Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{value}`"))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|err| format!("invalid resolution `{value}`: {err}"))
    };
    Ok((parse(w)?, parse(h)?))
}

fn parse_color(value: &str) -> std::result::Result<Color, String> {
    value.parse().map_err(|err: PresenterError| err.to_string())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Timed stimulus presentation with TTL triggers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Present a timeline and save the event log.
    Run(RunArgs),
    /// Load a timeline and all of its assets without presenting anything.
    Check {
        timeline: PathBuf,
        #[arg(long)]
        stimuli_dir: Option<PathBuf>,
        #[arg(long)]
        font: Option<PathBuf>,
    },
    /// Check that a trigger box answers and print its line states.
    Ping {
        device: String,
        #[arg(long, default_value_t = presenter_core::trigger::DEFAULT_BAUD)]
        baud: u32,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Timeline CSV; defaults to experiment.csv.
    timeline: Option<PathBuf>,
    /// JSON preset applied before the flags below.
    #[arg(short, long)]
    preset: Option<PathBuf>,
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Stimulus directory, relative to the timeline file.
    #[arg(long)]
    stimuli_dir: Option<PathBuf>,
    #[arg(long, value_parser = parse_resolution)]
    res: Option<(u32, u32)>,
    #[arg(long)]
    scale: Option<f32>,
    #[arg(long)]
    fullscreen: bool,
    #[arg(long)]
    no_fixation: bool,
    #[arg(long)]
    no_vsync: bool,
    /// Overrides the refresh rate reported by the display.
    #[arg(long)]
    refresh_rate: Option<f32>,
    #[arg(long)]
    font: Option<PathBuf>,
    #[arg(long)]
    font_size: Option<f32>,
    /// Minimum run length in milliseconds.
    #[arg(long)]
    total_duration: Option<u64>,
    /// Serial device of the trigger box.
    #[arg(long)]
    trigger: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    #[arg(long)]
    start_splash: Option<PathBuf>,
    #[arg(long)]
    end_splash: Option<PathBuf>,
    #[arg(long, value_parser = parse_color)]
    bg_color: Option<Color>,
    #[arg(long, value_parser = parse_color)]
    fixation_color: Option<Color>,
    #[arg(long, value_parser = parse_color)]
    text_color: Option<Color>,
    /// Record the audio mix to this WAV file instead of playing it on the
    /// sound device.
    #[arg(long)]
    audio_capture: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, config: &mut AppConfig) {
        let display = &mut config.display;
        if let Some((width, height)) = self.res {
            display.width = width;
            display.height = height;
        }
        if let Some(scale) = self.scale {
            display.scale_factor = scale;
        }
        display.fullscreen |= self.fullscreen;
        display.show_fixation &= !self.no_fixation;
        display.vsync &= !self.no_vsync;
        if self.refresh_rate.is_some() {
            display.refresh_rate_hz = self.refresh_rate;
        }
        if let Some(color) = self.bg_color {
            display.background = color;
        }
        if let Some(color) = self.fixation_color {
            display.fixation_color = color;
        }

        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if self.stimuli_dir.is_some() {
            config.stimuli_dir = self.stimuli_dir.clone();
        }
        if self.font.is_some() {
            config.font = self.font.clone();
        }
        if let Some(size) = self.font_size {
            config.font_size = size;
        }
        if let Some(color) = self.text_color {
            config.text_color = color;
        }
        if let Some(ms) = self.total_duration {
            config.min_total_duration_ms = ms;
        }
        if self.trigger.is_some() {
            config.trigger.device = self.trigger.clone();
        }
        if let Some(baud) = self.baud {
            config.trigger.baud = baud;
        }
        if self.start_splash.is_some() {
            config.start_splash = self.start_splash.clone();
        }
        if self.end_splash.is_some() {
            config.end_splash = self.end_splash.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn output_gets_a_timestamp() {
        let now = NaiveDate::from_ymd_opt(2025, 1, 2)
            .unwrap()
            .and_hms_opt(9, 30, 5)
            .unwrap();
        assert_eq!(
            timestamped_path(Path::new("out/results.csv"), now),
            PathBuf::from("out/results_20250102-093005.csv")
        );
        assert_eq!(
            timestamped_path(Path::new("log"), now),
            PathBuf::from("log_20250102-093005.csv")
        );
    }

    #[test]
    fn assets_resolve_next_to_the_timeline() {
        assert_eq!(assets_dir(Path::new("experiment.csv"), None), PathBuf::from("."));
        assert_eq!(
            assets_dir(Path::new("study/run1.csv"), Some(Path::new("stimuli"))),
            PathBuf::from("study/stimuli")
        );
        assert_eq!(
            assets_dir(Path::new("study/run1.csv"), Some(Path::new("/abs/stim"))),
            PathBuf::from("/abs/stim")
        );
    }

    #[test]
    fn resolution_flag_parses() {
        assert_eq!(parse_resolution("1024x768"), Ok((1024, 768)));
        assert_eq!(parse_resolution("800X600"), Ok((800, 600)));
        assert!(parse_resolution("1024").is_err());
        assert!(parse_resolution("axb").is_err());
    }

    #[test]
    fn flags_override_preset_values() {
        let cli = Cli::try_parse_from([
            "presenter",
            "run",
            "study.csv",
            "--res",
            "800x600",
            "--no-vsync",
            "--bg-color",
            "10,20,30",
            "--trigger",
            "/dev/ttyUSB0",
            "--total-duration",
            "5000",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let mut config = AppConfig::default();
        config.display.scale_factor = 0.5;
        args.apply(&mut config);

        assert_eq!(args.timeline, Some(PathBuf::from("study.csv")));
        assert_eq!((config.display.width, config.display.height), (800, 600));
        assert!(!config.display.vsync);
        assert!(config.display.show_fixation);
        assert_eq!(config.display.scale_factor, 0.5);
        assert_eq!(config.display.background, Color::rgb(10, 20, 30));
        assert_eq!(config.trigger.device.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.trigger.baud, 9600);
        assert_eq!(config.min_total_duration_ms, 5000);
    }

    #[test]
    fn capture_flag_records_instead_of_using_the_device() {
        let path = std::env::temp_dir().join(format!("presenter-main-{}.wav", std::process::id()));
        let mixer = Arc::new(Mixer::new());
        let mut output = audio_output(Some(&path)).unwrap();
        output.open(TARGET_SPEC, Arc::clone(&mixer)).unwrap();
        output.close();

        let reader = hound::WavReader::open(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(reader.spec().sample_rate, TARGET_SPEC.sample_rate);
    }

    #[test]
    fn bad_colour_flag_is_rejected() {
        assert!(Cli::try_parse_from(["presenter", "run", "--text-color", "white"]).is_err());
    }
}
