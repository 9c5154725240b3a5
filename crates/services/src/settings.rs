use std::env;
use std::time::Duration;

use tracing::warn;

const DEFAULT_TICK_MS: u64 = 1_000;
const DEFAULT_PRACTICE_SIZE: u32 = 10;
const MIN_TICK: Duration = Duration::from_millis(1);

/// Runtime knobs for the session engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Period of the runner's timer tick.
    pub tick_interval: Duration,
    /// Practice sample size when a session does not ask for one.
    pub practice_size: u32,
    /// Send checked practice answers to the scoring service.
    pub record_attempts: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_MS),
            practice_size: DEFAULT_PRACTICE_SIZE,
            record_attempts: true,
        }
    }
}

impl EngineSettings {
    /// Defaults overridden by `EXAM_TICK_MS`, `EXAM_PRACTICE_SIZE` and
    /// `EXAM_RECORD_ATTEMPTS`. Unparsable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(raw) = lookup("EXAM_TICK_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => settings.tick_interval = Duration::from_millis(ms),
                _ => warn!(value = %raw, "ignoring invalid EXAM_TICK_MS"),
            }
        }
        if let Some(raw) = lookup("EXAM_PRACTICE_SIZE") {
            match raw.trim().parse::<u32>() {
                Ok(size) if size > 0 => settings.practice_size = size,
                _ => warn!(value = %raw, "ignoring invalid EXAM_PRACTICE_SIZE"),
            }
        }
        if let Some(raw) = lookup("EXAM_RECORD_ATTEMPTS") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => settings.record_attempts = true,
                "0" | "false" | "no" | "off" => settings.record_attempts = false,
                _ => warn!(value = %raw, "ignoring invalid EXAM_RECORD_ATTEMPTS"),
            }
        }

        settings
    }

    /// Intervals below 1 ms are raised to 1 ms.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(MIN_TICK);
        self
    }

    #[must_use]
    pub fn with_practice_size(mut self, size: u32) -> Self {
        self.practice_size = size;
        self
    }

    #[must_use]
    pub fn with_record_attempts(mut self, record: bool) -> Self {
        self.record_attempts = record;
        self
    }
}
