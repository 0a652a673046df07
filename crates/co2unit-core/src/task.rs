//! Closed set of units of work the device knows how to run.
//!
//! Task ids are written into the event log and into the boot breadcrumb, so
//! an id must never be reused for a different task.

use heapless::Vec;

use crate::{fs::FsError, rtc::RtcError};

/// Maximum number of follow-up tasks one task may request.
pub const MAX_FOLLOW_UPS: usize = 4;

pub type FollowUps = Vec<Task, MAX_FOLLOW_UPS>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u16)]
pub enum Task {
    SelfTest = 1,
    SyncRtc = 2,
    TakeMeasurement = 3,
    Communicate = 4,
    InstallUpdates = 5,
}

impl Task {
    pub const ALL: [Task; 5] = [
        Task::SelfTest,
        Task::SyncRtc,
        Task::TakeMeasurement,
        Task::Communicate,
        Task::InstallUpdates,
    ];

    pub const fn id(self) -> u16 {
        self as u16
    }

    /// Looks up a task by its persisted id. Id 0 and unregistered ids map to `None`.
    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|task| task.id() == id)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Task::SelfTest => "SelfTest",
            Task::SyncRtc => "SyncRtc",
            Task::TakeMeasurement => "TakeMeasurement",
            Task::Communicate => "Communicate",
            Task::InstallUpdates => "InstallUpdates",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|task| task.name() == name)
    }

    /// Tasks that must have run earlier in the same episode.
    pub const fn deps(self) -> &'static [Task] {
        match self {
            Task::TakeMeasurement | Task::Communicate => &[Task::SyncRtc],
            Task::SelfTest | Task::SyncRtc | Task::InstallUpdates => &[],
        }
    }
}

impl core::fmt::Display for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a task did not complete.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskError {
    /// Operator interrupt. The only error the reactor lets unwind.
    Cancelled,
    /// The SD card is missing or unreadable.
    NoSdCard,
    Storage(FsError),
    Clock(RtcError),
    /// The network link could not be brought up.
    Link,
    Sensor,
    Install,
}

impl TaskError {
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

impl From<FsError> for TaskError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NoCard => TaskError::NoSdCard,
            other => TaskError::Storage(other),
        }
    }
}

impl From<RtcError> for TaskError {
    fn from(err: RtcError) -> Self {
        TaskError::Clock(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_the_registry() {
        for task in Task::ALL {
            assert_eq!(Task::from_id(task.id()), Some(task));
            assert_eq!(Task::from_name(task.name()), Some(task));
        }
        assert_eq!(Task::from_id(0), None);
        assert_eq!(Task::from_id(42), None);
    }

    #[test]
    fn persisted_ids_are_stable() {
        assert_eq!(Task::SelfTest.id(), 1);
        assert_eq!(Task::SyncRtc.id(), 2);
        assert_eq!(Task::TakeMeasurement.id(), 3);
        assert_eq!(Task::Communicate.id(), 4);
        assert_eq!(Task::InstallUpdates.id(), 5);
    }

    #[test]
    fn no_sd_card_is_reported_distinctly() {
        assert_eq!(TaskError::from(FsError::NoCard), TaskError::NoSdCard);
        assert_eq!(
            TaskError::from(FsError::NotFound),
            TaskError::Storage(FsError::NotFound)
        );
    }
}
