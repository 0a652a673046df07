//! Fixed-size circular event log kept in the non-volatile store.
//!
//! Each slot holds one packed word:
//!
//! ```text
//! bits  0..16  task id (0 = none)
//! bits 16..24  status
//! bits 24..32  repeat count (1..=255)
//! ```
//!
//! The ring is described by `log_start` (oldest slot) and `log_len`. The log
//! is the only post-mortem evidence after an unattended crash, so reading it
//! never fails: unreadable slots are skipped and store errors are logged.

use heapless::Vec;
use log::warn;

use crate::{
    nvs::{NvStore, keys},
    task::Task,
};

pub const EVENT_LOG_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum EventStatus {
    None = 0,
    Start = 1,
    Ok = 2,
    Fail = 3,
}

impl EventStatus {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Start),
            2 => Some(Self::Ok),
            3 => Some(Self::Fail),
            _ => None,
        }
    }
}

/// Task identity as read back from the log.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskRef {
    None,
    Known(Task),
    /// Id written by firmware with a different task registry.
    Unknown(u16),
}

impl TaskRef {
    fn from_id(id: u16) -> Self {
        if id == 0 {
            return TaskRef::None;
        }
        match Task::from_id(id) {
            Some(task) => TaskRef::Known(task),
            None => TaskRef::Unknown(id),
        }
    }

    fn id(self) -> u16 {
        match self {
            TaskRef::None => 0,
            TaskRef::Known(task) => task.id(),
            TaskRef::Unknown(id) => id,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EventRecord {
    pub task: TaskRef,
    pub status: EventStatus,
    pub repeat_count: u8,
}

impl EventRecord {
    pub const fn new(task: Task, status: EventStatus) -> Self {
        Self {
            task: TaskRef::Known(task),
            status,
            repeat_count: 1,
        }
    }

    pub fn pack(self) -> u32 {
        u32::from(self.task.id())
            | (u32::from(self.status as u8) << 16)
            | (u32::from(self.repeat_count) << 24)
    }

    /// Decodes a slot word. Returns `None` for words no writer could have produced.
    pub fn unpack(word: u32) -> Option<Self> {
        let status = EventStatus::from_raw(((word >> 16) & 0xFF) as u8)?;
        let repeat_count = (word >> 24) as u8;
        if repeat_count == 0 {
            return None;
        }
        Some(Self {
            task: TaskRef::from_id((word & 0xFFFF) as u16),
            status,
            repeat_count,
        })
    }

    fn same_event(&self, task: Task, status: EventStatus) -> bool {
        self.task == TaskRef::Known(task) && self.status == status
    }
}

pub type EventRecords = Vec<EventRecord, EVENT_LOG_CAPACITY>;

/// Operations on the event log ring stored in an [`NvStore`].
pub struct EventLog;

impl EventLog {
    /// Returns the log, oldest record first.
    pub fn read<S: NvStore>(store: &mut S) -> EventRecords {
        let mut out = EventRecords::new();
        let (start, len) = match ring_bounds(store) {
            Ok(bounds) => bounds,
            Err(err) => {
                warn!("event log: bounds unreadable err={:?}", err);
                return out;
            }
        };

        for i in 0..len {
            let slot = (start + i) % EVENT_LOG_CAPACITY;
            match store.get(keys::LOG_SLOTS[slot]) {
                Ok(Some(word)) => match EventRecord::unpack(word) {
                    Some(record) => {
                        let _ = out.push(record);
                    }
                    None => warn!("event log: slot={} corrupt word={:#010x}", slot, word),
                },
                Ok(None) => warn!("event log: slot={} missing", slot),
                Err(err) => warn!("event log: slot={} read failed err={:?}", slot, err),
            }
        }
        out
    }

    /// Most recent record, if it is readable.
    pub fn tail<S: NvStore>(store: &mut S) -> Option<EventRecord> {
        let (start, len) = ring_bounds(store).ok()?;
        if len == 0 {
            return None;
        }
        let slot = (start + len - 1) % EVENT_LOG_CAPACITY;
        let word = store.get(keys::LOG_SLOTS[slot]).ok()??;
        EventRecord::unpack(word)
    }

    /// Appends `(task, status)`, folding it into the tail record when it repeats.
    pub fn record<S: NvStore>(store: &mut S, task: Task, status: EventStatus) -> Result<(), S::Error> {
        let (start, len) = ring_bounds(store)?;

        if len > 0 {
            let tail_slot = (start + len - 1) % EVENT_LOG_CAPACITY;
            let tail = store
                .get(keys::LOG_SLOTS[tail_slot])?
                .and_then(EventRecord::unpack);
            if let Some(mut tail) = tail
                && tail.same_event(task, status)
            {
                tail.repeat_count = tail.repeat_count.saturating_add(1);
                return store.set(keys::LOG_SLOTS[tail_slot], tail.pack());
            }
        }

        let word = EventRecord::new(task, status).pack();
        if len < EVENT_LOG_CAPACITY {
            let slot = (start + len) % EVENT_LOG_CAPACITY;
            store.set(keys::LOG_SLOTS[slot], word)?;
            store.set(keys::LOG_LEN, (len + 1) as u32)
        } else {
            store.set(keys::LOG_SLOTS[start], word)?;
            store.set(keys::LOG_START, ((start + 1) % EVENT_LOG_CAPACITY) as u32)
        }
    }

    pub fn reset<S: NvStore>(store: &mut S) -> Result<(), S::Error> {
        store.erase(keys::LOG_START)?;
        store.erase(keys::LOG_LEN)?;
        for key in keys::LOG_SLOTS {
            store.erase(key)?;
        }
        Ok(())
    }
}

fn ring_bounds<S: NvStore>(store: &mut S) -> Result<(usize, usize), S::Error> {
    let start = store.get_or(keys::LOG_START, 0)? as usize % EVENT_LOG_CAPACITY;
    let len = (store.get_or(keys::LOG_LEN, 0)? as usize).min(EVENT_LOG_CAPACITY);
    Ok((start, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvs::MemoryNvStore;

    fn statuses(records: &EventRecords) -> std::vec::Vec<(TaskRef, EventStatus, u8)> {
        records
            .iter()
            .map(|r| (r.task, r.status, r.repeat_count))
            .collect()
    }

    #[test]
    fn records_are_read_back_in_order() {
        let mut store = MemoryNvStore::new();
        EventLog::record(&mut store, Task::SelfTest, EventStatus::Start).unwrap();
        EventLog::record(&mut store, Task::SelfTest, EventStatus::Ok).unwrap();
        EventLog::record(&mut store, Task::Communicate, EventStatus::Start).unwrap();

        let records = EventLog::read(&mut store);
        assert_eq!(
            statuses(&records),
            [
                (TaskRef::Known(Task::SelfTest), EventStatus::Start, 1),
                (TaskRef::Known(Task::SelfTest), EventStatus::Ok, 1),
                (TaskRef::Known(Task::Communicate), EventStatus::Start, 1),
            ]
        );
    }

    #[test]
    fn repeated_events_collapse_and_saturate() {
        let mut store = MemoryNvStore::new();
        for _ in 0..300 {
            EventLog::record(&mut store, Task::TakeMeasurement, EventStatus::Fail).unwrap();
        }
        let records = EventLog::read(&mut store);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].repeat_count, 255);

        let mut store = MemoryNvStore::new();
        for _ in 0..7 {
            EventLog::record(&mut store, Task::TakeMeasurement, EventStatus::Fail).unwrap();
        }
        assert_eq!(EventLog::tail(&mut store).unwrap().repeat_count, 7);
    }

    #[test]
    fn full_log_evicts_oldest_record() {
        let mut store = MemoryNvStore::new();
        EventLog::record(&mut store, Task::SelfTest, EventStatus::Start).unwrap();
        for i in 0..EVENT_LOG_CAPACITY {
            let status = if i % 2 == 0 {
                EventStatus::Ok
            } else {
                EventStatus::Start
            };
            EventLog::record(&mut store, Task::SyncRtc, status).unwrap();
        }

        let records = EventLog::read(&mut store);
        assert_eq!(records.len(), EVENT_LOG_CAPACITY);
        assert_eq!(records[0].task, TaskRef::Known(Task::SyncRtc));
        assert_eq!(records[0].status, EventStatus::Ok);
        assert_eq!(
            EventLog::tail(&mut store).unwrap().status,
            EventStatus::Start
        );
    }

    #[test]
    fn unregistered_ids_read_back_as_unknown() {
        let mut store = MemoryNvStore::new();
        store.set(keys::LOG_LEN, 1).unwrap();
        store
            .set(keys::LOG_SLOTS[0], 0x0100_0000 | (2 << 16) | 77)
            .unwrap();

        let records = EventLog::read(&mut store);
        assert_eq!(records[0].task, TaskRef::Unknown(77));
        assert_eq!(records[0].status, EventStatus::Ok);
    }

    #[test]
    fn corrupt_slot_is_skipped_not_fatal() {
        let mut store = MemoryNvStore::new();
        EventLog::record(&mut store, Task::SelfTest, EventStatus::Start).unwrap();
        EventLog::record(&mut store, Task::SelfTest, EventStatus::Ok).unwrap();
        EventLog::record(&mut store, Task::SyncRtc, EventStatus::Start).unwrap();
        store.set(keys::LOG_SLOTS[1], 0xFFFF_FFFF).unwrap();
        store.erase(keys::LOG_SLOTS[2]).unwrap();

        let records = EventLog::read(&mut store);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, EventStatus::Start);
    }

    #[test]
    fn garbage_bounds_are_clamped() {
        let mut store = MemoryNvStore::new();
        store.set(keys::LOG_START, 1000).unwrap();
        store.set(keys::LOG_LEN, 1000).unwrap();
        let records = EventLog::read(&mut store);
        assert!(records.is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let mut store = MemoryNvStore::new();
        EventLog::record(&mut store, Task::SelfTest, EventStatus::Start).unwrap();
        EventLog::reset(&mut store).unwrap();
        assert!(EventLog::read(&mut store).is_empty());
        assert_eq!(EventLog::tail(&mut store), None);
    }
}
