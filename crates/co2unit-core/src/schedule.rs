//! Wake scheduler: which task runs next and how long to sleep until then.

use alloc::vec::Vec;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use log::warn;
use rand::{Rng, RngCore};
use serde_json::Value;

use crate::task::Task;

const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Trigger {
    /// Minutes counted from the top of the current hour: the first
    /// `k * period + offset` past now. Periods that do not divide 60 run on
    /// into the next hour and realign at the following check.
    AlignedInterval { period_minutes: u32, offset_minutes: u32 },
    /// Once a day at `hour:minute`.
    TimeOfDay { hour: u32, minute: u32 },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScheduleRule {
    pub trigger: Trigger,
    /// Upper bound of the random delay added after the aligned time.
    pub jitter_secs: u32,
}

impl ScheduleRule {
    pub const fn aligned(period_minutes: u32, offset_minutes: u32) -> Self {
        Self {
            trigger: Trigger::AlignedInterval {
                period_minutes,
                offset_minutes,
            },
            jitter_secs: 0,
        }
    }

    pub const fn time_of_day(hour: u32, minute: u32) -> Self {
        Self {
            trigger: Trigger::TimeOfDay { hour, minute },
            jitter_secs: 0,
        }
    }

    pub const fn with_jitter(mut self, jitter_secs: u32) -> Self {
        self.jitter_secs = jitter_secs;
        self
    }

    /// Next aligned instant strictly after `now`, seconds zeroed.
    pub fn base_next(&self, now: NaiveDateTime) -> NaiveDateTime {
        let midnight = now.date().and_time(NaiveTime::default());

        match self.trigger {
            Trigger::AlignedInterval {
                period_minutes,
                offset_minutes,
            } => {
                let hour_start = midnight + TimeDelta::hours(i64::from(now.hour()));
                let minute = now.minute();
                let period = period_minutes.max(1);
                let offset = offset_minutes % period;
                let mut next = (minute / period) * period + offset;
                if next <= minute {
                    next += period;
                }
                hour_start + TimeDelta::minutes(i64::from(next))
            }
            Trigger::TimeOfDay { hour, minute } => {
                let at = (hour * 60 + minute) % MINUTES_PER_DAY;
                let mut next = midnight + TimeDelta::minutes(i64::from(at));
                if next <= now {
                    next += TimeDelta::days(1);
                }
                next
            }
        }
    }

    /// Jitter is added after alignment so the rule still fires once per window.
    pub fn next<R: RngCore + ?Sized>(&self, now: NaiveDateTime, rng: &mut R) -> NaiveDateTime {
        let base = self.base_next(now);
        if self.jitter_secs == 0 {
            return base;
        }
        let jitter = rng.gen_range(0..=self.jitter_secs);
        base + TimeDelta::seconds(i64::from(jitter))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScheduleEntry {
    pub task: Task,
    pub rule: ScheduleRule,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Obligation {
    pub task: Task,
    pub at: NaiveDateTime,
    pub seconds_until: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScheduleConfigError {
    UnknownTask,
    UnknownRule,
    BadArguments,
    Empty,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleTable {
    entries: Vec<ScheduleEntry>,
}

impl ScheduleTable {
    pub fn new(entries: Vec<ScheduleEntry>) -> Self {
        Self { entries }
    }

    /// Measure every five minutes, report once a night.
    pub fn default_table() -> Self {
        Self::new(alloc::vec![
            ScheduleEntry {
                task: Task::TakeMeasurement,
                rule: ScheduleRule::aligned(5, 0),
            },
            ScheduleEntry {
                task: Task::Communicate,
                rule: ScheduleRule::time_of_day(3, 15).with_jitter(600),
            },
        ])
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Parses rows such as `["TakeMeasurement", "minutes", 30, 0]` or
    /// `["Communicate", "daily", 3, 15, 600]`. The optional last number is jitter in seconds.
    pub fn from_config(rows: &[Vec<Value>]) -> Result<Self, ScheduleConfigError> {
        if rows.is_empty() {
            return Err(ScheduleConfigError::Empty);
        }
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let task = row
                .first()
                .and_then(Value::as_str)
                .and_then(Task::from_name)
                .ok_or(ScheduleConfigError::UnknownTask)?;
            let kind = row
                .get(1)
                .and_then(Value::as_str)
                .ok_or(ScheduleConfigError::UnknownRule)?;

            let mut args = [0u32; 3];
            let given = row.len().saturating_sub(2);
            if !(2..=3).contains(&given) {
                return Err(ScheduleConfigError::BadArguments);
            }
            for (slot, value) in args.iter_mut().zip(row[2..].iter()) {
                *slot = value
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or(ScheduleConfigError::BadArguments)?;
            }

            let rule = match kind {
                "minutes" => {
                    if args[0] == 0 {
                        return Err(ScheduleConfigError::BadArguments);
                    }
                    ScheduleRule::aligned(args[0], args[1])
                }
                "daily" => {
                    if args[0] > 23 || args[1] > 59 {
                        return Err(ScheduleConfigError::BadArguments);
                    }
                    ScheduleRule::time_of_day(args[0], args[1])
                }
                _ => return Err(ScheduleConfigError::UnknownRule),
            };
            entries.push(ScheduleEntry {
                task,
                rule: rule.with_jitter(args[2]),
            });
        }
        Ok(Self::new(entries))
    }

    /// Like [`Self::from_config`], but never fails: bad or empty tables fall back to the default.
    pub fn from_config_or_default(rows: &[Vec<Value>]) -> Self {
        match Self::from_config(rows) {
            Ok(table) => table,
            Err(ScheduleConfigError::Empty) => Self::default_table(),
            Err(err) => {
                warn!("schedule: invalid config err={:?}; using default table", err);
                Self::default_table()
            }
        }
    }

    /// Upcoming occurrence of every entry, soonest first. Ties keep table order.
    pub fn agenda<R: RngCore + ?Sized>(&self, now: NaiveDateTime, rng: &mut R) -> Vec<Obligation> {
        let mut agenda: Vec<Obligation> = self
            .entries
            .iter()
            .map(|entry| {
                let at = entry.rule.next(now, rng);
                let seconds_until = (at - now).num_seconds().clamp(0, i64::from(u32::MAX)) as u32;
                Obligation {
                    task: entry.task,
                    at,
                    seconds_until,
                }
            })
            .collect();
        agenda.sort_by_key(|obligation| obligation.seconds_until);
        agenda
    }

    pub fn next_obligation<R: RngCore + ?Sized>(
        &self,
        now: NaiveDateTime,
        rng: &mut R,
    ) -> Option<Obligation> {
        self.agenda(now, rng).into_iter().next()
    }
}

impl Default for ScheduleTable {
    fn default() -> Self {
        Self::default_table()
    }
}
