//! Task bodies and their dispatch.

pub mod communicate;
pub mod measure;
pub mod rtc_sync;
pub mod updates;

use alloc::format;

use log::warn;

use crate::{
    board::{Board, Platform},
    context::DeviceContext,
    error_log::Severity,
    event_log::{EventLog, EventStatus},
    reactor::TaskRunner,
    task::{FollowUps, Task, TaskError},
};

impl<B: Board> TaskRunner for DeviceContext<B> {
    async fn run_task(&mut self, task: Task) -> Result<FollowUps, TaskError> {
        if self.platform.cancel_requested() {
            return Err(TaskError::Cancelled);
        }
        let result = match task {
            Task::SelfTest => self_test::run(self),
            Task::SyncRtc => rtc_sync::run(self),
            Task::TakeMeasurement => measure::run(self),
            Task::Communicate => communicate::run(self).await,
            Task::InstallUpdates => updates::run(self),
        };
        if let Err(err) = &result
            && !err.is_cancellation()
        {
            self.report(Severity::Exception, &format!("{} failed: {:?}", task, err));
        }
        result
    }

    fn record(&mut self, task: Task, status: EventStatus) {
        if let Err(err) = EventLog::record(&mut self.nvs, task, status) {
            warn!("event log: record failed task={} status={:?} err={:?}", task, status, err);
        }
    }

    fn feed_watchdog(&mut self) {
        self.platform.feed_watchdog();
    }

    fn halt_requested(&self) -> bool {
        self.reboot_requested().is_some()
    }
}
