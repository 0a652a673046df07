//! In-memory task queue for one power-on episode.
//!
//! The queue is never persisted. The event log records every start and
//! outcome, and the boot breadcrumb is the only intent that survives a reset.

use alloc::vec::Vec as AllocVec;

use heapless::{Deque, Vec};
use log::{error, info, warn};

use crate::{
    event_log::EventStatus,
    task::{FollowUps, Task, TaskError},
};

pub const MAX_QUEUE: usize = 16;
/// Upper bound on tasks started in one episode. Stops a task that keeps
/// re-queueing itself from running until the watchdog fires.
pub const MAX_TASKS_PER_EPISODE: usize = 32;

pub type DepsFn = fn(Task) -> &'static [Task];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReactorError {
    /// Operator interrupt raised by a task.
    Cancelled,
    DependencyCycle(Task),
    QueueFull,
    TooManyTasks,
}

/// What the reactor needs from the device to run a task.
#[allow(async_fn_in_trait)]
pub trait TaskRunner {
    async fn run_task(&mut self, task: Task) -> Result<FollowUps, TaskError>;
    /// Appends to the persistent event log. Must not fail.
    fn record(&mut self, task: Task, status: EventStatus);
    fn feed_watchdog(&mut self);
    /// A task asked for a restart. Nothing else may run in this episode.
    fn halt_requested(&self) -> bool;
}

pub struct Reactor {
    queue: Deque<Task, MAX_QUEUE>,
    history: Vec<Task, MAX_TASKS_PER_EPISODE>,
    failed: Vec<Task, MAX_TASKS_PER_EPISODE>,
    deps: DepsFn,
    queue_limit: usize,
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor {
    pub fn new() -> Self {
        Self::with_deps(Task::deps)
    }

    pub fn with_deps(deps: DepsFn) -> Self {
        Self {
            queue: Deque::new(),
            history: Vec::new(),
            failed: Vec::new(),
            deps,
            queue_limit: MAX_QUEUE,
        }
    }

    /// Caps the queue below [`MAX_QUEUE`].
    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = limit.min(MAX_QUEUE);
        self
    }

    /// Tasks started this episode, in order.
    pub fn history(&self) -> &[Task] {
        &self.history
    }

    pub fn failed(&self) -> &[Task] {
        &self.failed
    }

    pub fn pending(&self) -> impl Iterator<Item = Task> + '_ {
        self.queue.iter().copied()
    }

    /// Puts `tasks` at the front of the queue, keeping their order, then
    /// moves missing prerequisites in front of the tasks that need them.
    /// A task already queued is kept at its first position only.
    ///
    /// The queue is left unchanged when the result would not fit.
    pub fn push_tasks(&mut self, tasks: &[Task]) -> Result<(), ReactorError> {
        let combined: AllocVec<Task> = tasks.iter().chain(self.queue.iter()).copied().collect();
        let ordered: Vec<Task, MAX_QUEUE> = resolve_order(&combined, &self.history, self.deps)?;
        if ordered.len() > self.queue_limit {
            return Err(ReactorError::QueueFull);
        }
        self.queue.clear();
        for task in ordered {
            self.queue.push_back(task).map_err(|_| ReactorError::QueueFull)?;
        }
        Ok(())
    }

    /// Like [`Self::push_tasks`], but a queue without room for every
    /// follow-up keeps the ones that fit and drops the rest.
    fn push_follow_ups(&mut self, task: Task, follow_ups: &[Task]) -> Result<(), ReactorError> {
        for keep in (1..=follow_ups.len()).rev() {
            match self.push_tasks(&follow_ups[..keep]) {
                Ok(()) => {
                    if keep < follow_ups.len() {
                        warn!(
                            "reactor: queue full after task={} dropped={:?}",
                            task,
                            &follow_ups[keep..]
                        );
                    }
                    return Ok(());
                }
                Err(ReactorError::QueueFull) => {}
                Err(err) => return Err(err),
            }
        }
        warn!("reactor: queue full after task={} dropped={:?}", task, follow_ups);
        Ok(())
    }

    /// Runs until the queue is empty. A failing task is recorded and dropped
    /// with its follow-ups; only a cancellation stops the loop. A requested
    /// restart ends the loop early with the rest of the queue discarded.
    pub async fn run<R: TaskRunner + ?Sized>(&mut self, runner: &mut R) -> Result<(), ReactorError> {
        while let Some(task) = self.queue.pop_front() {
            runner.feed_watchdog();
            if self.history.push(task).is_err() {
                error!("reactor: task limit reached task={}", task);
                return Err(ReactorError::TooManyTasks);
            }

            runner.record(task, EventStatus::Start);
            info!("reactor: start task={}", task);
            match runner.run_task(task).await {
                Ok(follow_ups) => {
                    runner.record(task, EventStatus::Ok);
                    info!("reactor: ok task={} follow_ups={:?}", task, follow_ups.as_slice());
                    if !follow_ups.is_empty() {
                        self.push_follow_ups(task, &follow_ups)?;
                    }
                }
                Err(err) if err.is_cancellation() => {
                    warn!("reactor: cancelled during task={}", task);
                    return Err(ReactorError::Cancelled);
                }
                Err(err) => {
                    runner.record(task, EventStatus::Fail);
                    error!("reactor: fail task={} err={:?}", task, err);
                    let _ = self.failed.push(task);
                }
            }
            if runner.halt_requested() {
                let dropped: Vec<Task, MAX_QUEUE> = self.queue.iter().copied().collect();
                info!("reactor: restart requested after task={} dropped={:?}", task, dropped.as_slice());
                self.queue.clear();
                break;
            }
        }
        Ok(())
    }
}

/// Orders `queue` so each task's prerequisites come before it, unless they
/// already ran (`done`). A task already placed earlier is not placed twice.
pub fn resolve_order<const N: usize>(
    queue: &[Task],
    done: &[Task],
    deps: DepsFn,
) -> Result<Vec<Task, N>, ReactorError> {
    let mut out: Vec<Task, N> = Vec::new();
    let mut path: Vec<Task, N> = Vec::new();
    for &task in queue {
        if out.contains(&task) {
            continue;
        }
        place_deps(task, done, deps, &mut out, &mut path)?;
        out.push(task).map_err(|_| ReactorError::QueueFull)?;
    }
    Ok(out)
}

fn place_deps<const N: usize>(
    task: Task,
    done: &[Task],
    deps: DepsFn,
    out: &mut Vec<Task, N>,
    path: &mut Vec<Task, N>,
) -> Result<(), ReactorError> {
    if path.contains(&task) {
        return Err(ReactorError::DependencyCycle(task));
    }
    path.push(task).map_err(|_| ReactorError::QueueFull)?;
    for &dep in deps(task) {
        if done.contains(&dep) || out.contains(&dep) {
            continue;
        }
        place_deps(dep, done, deps, out, path)?;
        out.push(dep).map_err(|_| ReactorError::QueueFull)?;
    }
    path.pop();
    Ok(())
}

#[cfg(test)]
mod tests;
