//! Deadline-based countdown clocks.
//!
//! Remaining time is always derived as `max(0, deadline - now)`; nothing here
//! accumulates ticks, so a suspended host process cannot make a clock drift.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::model::SectionId;

/// A single countdown towards an absolute deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    deadline: DateTime<Utc>,
}

impl Countdown {
    #[must_use]
    pub fn until(deadline: DateTime<Utc>) -> Self {
        Self { deadline }
    }

    /// Arms a countdown of `seconds` starting at `start`.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>, seconds: u32) -> Self {
        Self::until(start + Duration::seconds(i64::from(seconds)))
    }

    #[must_use]
    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Remaining time, clamped at zero.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline - now).max(Duration::zero())
    }

    /// Remaining whole seconds, rounded up so a clock reads `0` only once expired.
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        ceil_seconds(self.remaining(now))
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

fn ceil_seconds(d: Duration) -> u64 {
    let millis = u64::try_from(d.num_milliseconds()).unwrap_or(0);
    millis.div_ceil(1000)
}

/// Clock for the active section. Paused while the attempt sits in time-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionClock {
    Running {
        section: SectionId,
        countdown: Countdown,
    },
    Paused {
        section: SectionId,
        remaining: Duration,
    },
}

impl SectionClock {
    #[must_use]
    pub fn section(&self) -> SectionId {
        match self {
            SectionClock::Running { section, .. } | SectionClock::Paused { section, .. } => *section,
        }
    }

    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        match self {
            SectionClock::Running { countdown, .. } => countdown.remaining(now),
            SectionClock::Paused { remaining, .. } => *remaining,
        }
    }
}

/// What a single tick observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// The overall clock crossed zero on this tick (reported once).
    pub overall_expired: bool,
    /// The running section clock has reached zero.
    pub section_expired: Option<SectionId>,
    pub overall_remaining: Option<u64>,
    pub section_remaining: Option<u64>,
}

/// The overall attempt clock plus the optional active-section clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSet {
    overall: Option<Countdown>,
    overall_fired: bool,
    section: Option<SectionClock>,
    stopped: bool,
}

impl TimerSet {
    #[must_use]
    pub fn new(overall: Option<Countdown>) -> Self {
        Self {
            overall,
            overall_fired: false,
            section: None,
            stopped: false,
        }
    }

    #[must_use]
    pub fn overall(&self) -> Option<Countdown> {
        self.overall
    }

    #[must_use]
    pub fn section_clock(&self) -> Option<SectionClock> {
        self.section
    }

    /// Arms the section clock when the section has a limit, otherwise clears it.
    pub fn arm_section(&mut self, section: SectionId, limit_seconds: Option<u32>, now: DateTime<Utc>) {
        if self.stopped {
            return;
        }
        self.section = limit_seconds.map(|secs| SectionClock::Running {
            section,
            countdown: Countdown::starting_at(now, secs),
        });
    }

    pub fn disarm_section(&mut self) {
        self.section = None;
    }

    /// Freezes the section clock at its current remaining time.
    pub fn suspend_section(&mut self, now: DateTime<Utc>) {
        if let Some(SectionClock::Running { section, countdown }) = self.section {
            self.section = Some(SectionClock::Paused {
                section,
                remaining: countdown.remaining(now),
            });
        }
    }

    /// Re-arms a paused section clock with the time it had left.
    pub fn resume_section(&mut self, now: DateTime<Utc>) {
        if self.stopped {
            return;
        }
        if let Some(SectionClock::Paused { section, remaining }) = self.section {
            self.section = Some(SectionClock::Running {
                section,
                countdown: Countdown::until(now + remaining),
            });
        }
    }

    #[must_use]
    pub fn overall_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        self.overall.map(|c| c.remaining_seconds(now))
    }

    #[must_use]
    pub fn section_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        self.section.map(|c| ceil_seconds(c.remaining(now)))
    }

    /// Recomputes both clocks against `now`.
    ///
    /// A stopped timer set reports nothing.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        if self.stopped {
            return TickReport::default();
        }

        let overall_expired = match self.overall {
            Some(c) if !self.overall_fired && c.is_expired(now) => {
                self.overall_fired = true;
                true
            }
            _ => false,
        };

        let section_expired = match self.section {
            Some(SectionClock::Running { section, countdown }) if countdown.is_expired(now) => {
                Some(section)
            }
            _ => None,
        };

        TickReport {
            overall_expired,
            section_expired,
            overall_remaining: self.overall_remaining(now),
            section_remaining: self.section_remaining(now),
        }
    }

    /// Permanently stops both clocks.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.section = None;
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn remaining_is_clamped_and_deadline_based() {
        let start = fixed_now();
        let c = Countdown::starting_at(start, 120);
        assert_eq!(c.remaining_seconds(start + Duration::seconds(30)), 90);
        // A long suspension does not produce negative time.
        assert_eq!(c.remaining_seconds(start + Duration::hours(3)), 0);
        assert!(c.is_expired(start + Duration::seconds(120)));
    }

    #[test]
    fn partial_seconds_round_up() {
        let start = fixed_now();
        let c = Countdown::starting_at(start, 10);
        assert_eq!(c.remaining_seconds(start + Duration::milliseconds(9_500)), 1);
    }

    #[test]
    fn overall_expiry_reported_once() {
        let start = fixed_now();
        let mut timers = TimerSet::new(Some(Countdown::starting_at(start, 5)));
        assert!(!timers.tick(start + Duration::seconds(4)).overall_expired);
        assert!(timers.tick(start + Duration::seconds(5)).overall_expired);
        assert!(!timers.tick(start + Duration::seconds(6)).overall_expired);
    }

    #[test]
    fn suspended_section_keeps_remaining_time() {
        let start = fixed_now();
        let section = SectionId::new(1);
        let mut timers = TimerSet::new(None);
        timers.arm_section(section, Some(60), start);

        timers.suspend_section(start + Duration::seconds(20));
        // Time spent paused does not count against the section.
        assert_eq!(timers.section_remaining(start + Duration::seconds(500)), Some(40));

        timers.resume_section(start + Duration::seconds(500));
        assert_eq!(timers.section_remaining(start + Duration::seconds(510)), Some(30));
    }

    #[test]
    fn stopped_timers_report_nothing() {
        let start = fixed_now();
        let mut timers = TimerSet::new(Some(Countdown::starting_at(start, 1)));
        timers.arm_section(SectionId::new(1), Some(1), start);
        timers.stop();

        let report = timers.tick(start + Duration::seconds(10));
        assert_eq!(report, TickReport::default());
        timers.arm_section(SectionId::new(2), Some(5), start);
        assert!(timers.section_clock().is_none());
    }

    #[test]
    fn section_without_limit_is_not_armed() {
        let mut timers = TimerSet::new(None);
        timers.arm_section(SectionId::new(1), None, fixed_now());
        assert!(timers.section_clock().is_none());
    }
}
