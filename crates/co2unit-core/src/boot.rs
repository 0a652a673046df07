//! Decides the work of a fresh episode from the reset cause and the
//! breadcrumb left by the previous one.

use heapless::Vec;
use log::{error, info, warn};

use crate::{
    event_log::{EventLog, EventRecord, EventStatus, TaskRef},
    nvs::{NvStore, keys},
    reactor::{MAX_QUEUE, resolve_order},
    task::Task,
};

/// Unfinished starts of one task, with no completion since, that count as a
/// crash loop.
pub const CRASH_LOOP_LIMIT: u32 = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResetCause {
    PowerOn,
    DeepSleepWake,
    Watchdog,
    SoftReset,
    Unknown,
}

pub type BootQueue = Vec<Task, 2>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootPlan {
    pub cause: ResetCause,
    pub breadcrumb: Option<Task>,
    pub queue: BootQueue,
    /// Task that kept resetting the board before it could finish.
    pub crash_loop: Option<Task>,
}

pub fn read_breadcrumb<S: NvStore>(store: &mut S) -> Option<Task> {
    match store.get(keys::NEXT_TASK) {
        Ok(Some(0)) | Ok(None) => None,
        Ok(Some(id)) => {
            let task = u16::try_from(id).ok().and_then(Task::from_id);
            if task.is_none() {
                warn!("boot: breadcrumb names unknown task id={}", id);
            }
            task
        }
        Err(err) => {
            warn!("boot: breadcrumb unreadable err={:?}", err);
            None
        }
    }
}

pub fn write_breadcrumb<S: NvStore>(store: &mut S, task: Option<Task>) -> Result<(), S::Error> {
    store.set(keys::NEXT_TASK, task.map_or(0, |task| u32::from(task.id())))
}

pub fn resolve<S: NvStore>(store: &mut S, cause: ResetCause) -> BootPlan {
    let breadcrumb = read_breadcrumb(store);
    let chosen = match cause {
        ResetCause::PowerOn => Task::SelfTest,
        ResetCause::DeepSleepWake | ResetCause::Watchdog | ResetCause::SoftReset => {
            breadcrumb.unwrap_or(Task::TakeMeasurement)
        }
        ResetCause::Unknown => {
            warn!("boot: unknown reset cause");
            breadcrumb.unwrap_or(Task::TakeMeasurement)
        }
    };

    let crash_loop = crash_looping_task(store, chosen);
    let mut queue = BootQueue::new();
    if let Some(task) = crash_loop {
        error!(
            "boot: crash loop task={} starts={}; skipping work this episode",
            task, CRASH_LOOP_LIMIT
        );
        if let Err(err) = EventLog::record(store, task, EventStatus::Fail) {
            warn!("boot: event log write failed err={:?}", err);
        }
    } else {
        let _ = queue.push(chosen);
    }

    info!(
        "boot: cause={:?} breadcrumb={:?} queue={:?}",
        cause,
        breadcrumb,
        queue.as_slice()
    );
    BootPlan {
        cause,
        breadcrumb,
        queue,
        crash_loop,
    }
}

/// The task among `chosen` and its prerequisites that keeps resetting the
/// board. Records of other tasks in between do not matter; only a completion
/// of the task itself clears its count.
fn crash_looping_task<S: NvStore>(store: &mut S, chosen: Task) -> Option<Task> {
    let records = EventLog::read(store);
    let episode: Vec<Task, MAX_QUEUE> = match resolve_order(&[chosen], &[], Task::deps) {
        Ok(order) => order,
        Err(err) => {
            warn!("boot: prerequisites unresolvable err={:?}", err);
            let mut only = Vec::new();
            let _ = only.push(chosen);
            only
        }
    };
    episode
        .iter()
        .copied()
        .find(|&task| unfinished_starts(&records, task) >= CRASH_LOOP_LIMIT)
}

/// `START` records of `task` since its last `OK` or `FAIL`.
pub fn unfinished_starts(records: &[EventRecord], task: Task) -> u32 {
    records
        .iter()
        .filter(|record| record.task == TaskRef::Known(task))
        .fold(0, |pending, record| match record.status {
            EventStatus::Start => pending + u32::from(record.repeat_count),
            EventStatus::Ok | EventStatus::Fail => 0,
            EventStatus::None => pending,
        })
}
