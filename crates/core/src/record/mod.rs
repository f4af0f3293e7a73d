use std::{fmt, fs::File, io::Write, path::Path};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Column names of the saved event log.
pub const LOG_HEADER: [&str; 4] = ["intended_ms", "actual_ms", "type", "label"];

/// Tag stored in the `type` column of the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ImageOnset,
    ImageOffset,
    TextOnset,
    TextOffset,
    SoundOnset,
    Response,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageOnset => "IMAGE_ONSET",
            Self::ImageOffset => "IMAGE_OFFSET",
            Self::TextOnset => "TEXT_ONSET",
            Self::TextOffset => "TEXT_OFFSET",
            Self::SoundOnset => "SOUND_ONSET",
            Self::Response => "RESPONSE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the event log. Both timestamps are milliseconds since run start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub intended_ms: u64,
    pub actual_ms: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub label: String,
}

/// Append-only record of what was shown, played and pressed, in detection order.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    entries: Vec<LogEntry>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, intended_ms: u64, actual_ms: u64, kind: EventKind, label: impl Into<String>) {
        self.entries.push(LogEntry {
            intended_ms,
            actual_ms,
            kind,
            label: label.into(),
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries of the given type.
    pub fn count(&self, kind: EventKind) -> usize {
        self.entries.iter().filter(|entry| entry.kind == kind).count()
    }

    /// Writes the header row followed by every entry in insertion order.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        csv.write_record(LOG_HEADER)?;
        for entry in &self.entries {
            csv.serialize(entry)?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Saves the log as CSV. On failure the in-memory entries are untouched so
    /// the caller can report the problem or retry with another path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        self.write_to(file)?;
        tracing::info!(path = %path.display(), entries = self.len(), "event log saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(log: &EventLog) -> String {
        let mut out = Vec::new();
        log.write_to(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn empty_log_still_has_header() {
        assert_eq!(rendered(&EventLog::new()), "intended_ms,actual_ms,type,label\n");
    }

    #[test]
    fn rows_follow_insertion_order() {
        let mut log = EventLog::new();
        log.log(300, 304, EventKind::ImageOffset, "a.png");
        log.log(100, 112, EventKind::ImageOnset, "a.png");
        log.log(150, 150, EventKind::Response, "Space");

        assert_eq!(
            rendered(&log),
            "intended_ms,actual_ms,type,label\n\
             300,304,IMAGE_OFFSET,a.png\n\
             100,112,IMAGE_ONSET,a.png\n\
             150,150,RESPONSE,Space\n"
        );
        assert_eq!(log.count(EventKind::ImageOnset), 1);
        assert_eq!(log.count(EventKind::SoundOnset), 0);
    }

    #[test]
    fn labels_with_delimiters_are_quoted() {
        let mut log = EventLog::new();
        log.log(0, 1, EventKind::TextOnset, "Hello, world");
        assert!(rendered(&log).ends_with("0,1,TEXT_ONSET,\"Hello, world\"\n"));
    }

    #[test]
    fn failed_save_keeps_entries() {
        let mut log = EventLog::new();
        log.log(0, 0, EventKind::Response, "a");
        log.log(5, 6, EventKind::SoundOnset, "beep.wav");

        let bad = std::env::temp_dir()
            .join("presenter-core-missing-dir")
            .join("nested")
            .join("results.csv");
        assert!(log.save(&bad).is_err());
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[1].label, "beep.wav");
    }

    #[test]
    fn saves_to_disk() {
        let path = std::env::temp_dir().join(format!(
            "presenter-core-log-{}.csv",
            std::process::id()
        ));
        let mut log = EventLog::new();
        log.log(100, 101, EventKind::ImageOnset, "a.png");
        log.save(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(written.lines().count(), 2);
        assert!(written.contains("100,101,IMAGE_ONSET,a.png"));
    }
}
