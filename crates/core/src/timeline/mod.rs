use std::{
    fmt,
    fs::File,
    io::Read,
    path::Path,
    str::FromStr,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{record::EventKind, PresenterError, Result};

/// What a stimulus presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StimulusKind {
    Image,
    Sound,
    Text,
}

/// Returned when a timeline names a stimulus kind that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stimulus type `{0}`")]
pub struct UnknownKind(pub String);

impl FromStr for StimulusKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "sound" => Ok(Self::Sound),
            "text" => Ok(Self::Text),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

impl StimulusKind {
    /// Image and text stimuli occupy the screen; sounds go to the mixer.
    pub fn is_visual(self) -> bool {
        matches!(self, Self::Image | Self::Text)
    }

    /// Trigger line (ASCII digit) raised while this kind of stimulus is active.
    pub fn trigger_line(self) -> &'static str {
        match self {
            Self::Image => "1",
            Self::Sound => "2",
            Self::Text => "3",
        }
    }

    pub fn onset_event(self) -> EventKind {
        match self {
            Self::Image => EventKind::ImageOnset,
            Self::Sound => EventKind::SoundOnset,
            Self::Text => EventKind::TextOnset,
        }
    }

    /// Sounds are fire-and-forget and have no offset event.
    pub fn offset_event(self) -> Option<EventKind> {
        match self {
            Self::Image => Some(EventKind::ImageOffset),
            Self::Text => Some(EventKind::TextOffset),
            Self::Sound => None,
        }
    }
}

impl fmt::Display for StimulusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Image => "image",
            Self::Sound => "sound",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}

/// One scheduled presentation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stimulus {
    pub onset_ms: u64,
    pub duration_ms: u64,
    pub kind: StimulusKind,
    /// File path for images and sounds, the literal text for text stimuli.
    pub reference: String,
}

impl Stimulus {
    pub fn new(
        onset_ms: u64,
        duration_ms: u64,
        kind: StimulusKind,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            onset_ms,
            duration_ms,
            kind,
            reference: reference.into(),
        }
    }

    pub fn offset_ms(&self) -> u64 {
        self.onset_ms.saturating_add(self.duration_ms)
    }
}

/// Ordered stimulus sequence. Index order is the firing order; onsets are
/// expected to be non-decreasing but this is not enforced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    stimuli: Vec<Stimulus>,
}

impl Timeline {
    pub fn new(stimuli: Vec<Stimulus>) -> Self {
        Self { stimuli }
    }

    /// Loads a timeline file: one `onset,duration,kind,reference` row per stimulus.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            PresenterError::msg(format!("cannot open timeline {}: {err}", path.display()))
        })?;
        let timeline = Self::from_reader(file)?;
        tracing::info!(path = %path.display(), stimuli = timeline.len(), "timeline loaded");
        Ok(timeline)
    }

    /// Parses timeline rows from any reader.
    ///
    /// Rows with fewer than four fields are skipped without error, whereas a
    /// malformed number or an unknown kind aborts the whole load. Lines
    /// starting with `#` are comments.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut stimuli = Vec::new();
        for (index, record) in csv.records().enumerate() {
            let record = record?;
            let line = record
                .position()
                .map_or(index + 1, |pos| pos.line() as usize);

            if record.len() < 4 {
                tracing::debug!(line, fields = record.len(), "skipping short timeline row");
                continue;
            }

            let onset_ms = parse_ms(&record[0], line, "onset")?;
            let duration_ms = parse_ms(&record[1], line, "duration")?;
            let kind = record[2]
                .parse::<StimulusKind>()
                .map_err(|err| PresenterError::timeline(line, err.to_string()))?;

            stimuli.push(Stimulus::new(onset_ms, duration_ms, kind, &record[3]));
        }

        Ok(Self { stimuli })
    }

    pub fn len(&self) -> usize {
        self.stimuli.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stimuli.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Stimulus> {
        self.stimuli.get(index)
    }

    pub fn stimuli(&self) -> &[Stimulus] {
        &self.stimuli
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stimulus> {
        self.stimuli.iter()
    }

    /// End of the last stimulus in index order plus `margin_ms`. An empty
    /// timeline lasts `margin_ms`.
    pub fn total_duration_ms(&self, margin_ms: u64) -> u64 {
        self.stimuli
            .last()
            .map_or(0, Stimulus::offset_ms)
            .saturating_add(margin_ms)
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Stimulus;
    type IntoIter = std::slice::Iter<'a, Stimulus>;

    fn into_iter(self) -> Self::IntoIter {
        self.stimuli.iter()
    }
}

fn parse_ms(field: &str, line: usize, what: &str) -> Result<u64> {
    field
        .parse::<u64>()
        .map_err(|err| PresenterError::timeline(line, format!("invalid {what} `{field}`: {err}")))
}

/// Monotonic millisecond time source driving the presentation loop.
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&self, ms: u64);
}

/// Wall clock backed by [`Instant`], zeroed when constructed.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::start()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_in_file_order() {
        let src = "\
# onset,duration,kind,reference
100,200,image,faces/a.png
50,0,SOUND,beep.wav
400, 1000 ,Text,Press a key
";
        let timeline = Timeline::from_reader(src.as_bytes()).unwrap();

        assert_eq!(timeline.len(), 3);
        assert_eq!(
            timeline.get(0),
            Some(&Stimulus::new(100, 200, StimulusKind::Image, "faces/a.png"))
        );
        assert_eq!(timeline.get(1).unwrap().kind, StimulusKind::Sound);
        assert_eq!(timeline.get(1).unwrap().onset_ms, 50);
        assert_eq!(timeline.get(2).unwrap().reference, "Press a key");
        assert_eq!(timeline.get(2).unwrap().duration_ms, 1000);
    }

    #[test]
    fn skips_rows_with_too_few_fields() {
        let src = "100,200,image\n\n300,10,text,hello\n";
        let timeline = Timeline::from_reader(src.as_bytes()).unwrap();

        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.get(0).unwrap().reference, "hello");
    }

    #[test]
    fn unknown_kind_is_a_hard_error() {
        let src = "0,100,image,a.png\n10,100,video,b.mp4\n";
        let err = Timeline::from_reader(src.as_bytes()).unwrap_err();

        match err {
            PresenterError::Timeline { line, reason } => {
                assert_eq!(line, 2);
                assert!(reason.contains("video"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn malformed_number_is_a_hard_error() {
        let src = "abc,100,image,a.png\n";
        let err = Timeline::from_reader(src.as_bytes()).unwrap_err();
        assert!(format!("{err}").contains("invalid onset"));

        let src = "0,-5,image,a.png\n";
        let err = Timeline::from_reader(src.as_bytes()).unwrap_err();
        assert!(format!("{err}").contains("invalid duration"));
    }

    #[test]
    fn kind_parsing_is_total_and_case_insensitive() {
        assert_eq!("IMAGE".parse::<StimulusKind>(), Ok(StimulusKind::Image));
        assert_eq!("Sound".parse::<StimulusKind>(), Ok(StimulusKind::Sound));
        assert_eq!(" text ".parse::<StimulusKind>(), Ok(StimulusKind::Text));
        assert_eq!(
            "".parse::<StimulusKind>(),
            Err(UnknownKind(String::new()))
        );
    }

    #[test]
    fn total_duration_uses_last_index_not_latest_offset() {
        let timeline = Timeline::new(vec![
            Stimulus::new(1000, 5000, StimulusKind::Image, "late.png"),
            Stimulus::new(100, 200, StimulusKind::Image, "a.png"),
        ]);
        assert_eq!(timeline.total_duration_ms(500), 800);
        assert_eq!(Timeline::default().total_duration_ms(500), 500);
    }

    #[test]
    fn monotonic_clock_moves_forward() {
        let clock = MonotonicClock::start();
        let first = clock.now_ms();
        clock.sleep_ms(2);
        assert!(clock.now_ms() >= first + 1);
    }
}
