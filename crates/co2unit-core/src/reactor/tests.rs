use alloc::{collections::BTreeMap, vec, vec::Vec};

use embassy_futures::block_on;

use super::*;

#[derive(Default)]
struct ScriptedRunner {
    outcomes: BTreeMap<Task, Result<FollowUps, TaskError>>,
    ran: Vec<Task>,
    events: Vec<(Task, EventStatus)>,
    feeds: u32,
    restart_after: Option<Task>,
    restart_requested: bool,
}

impl ScriptedRunner {
    fn returns(mut self, task: Task, follow_ups: &[Task]) -> Self {
        let follow_ups = FollowUps::from_slice(follow_ups).unwrap();
        self.outcomes.insert(task, Ok(follow_ups));
        self
    }

    fn fails(mut self, task: Task, err: TaskError) -> Self {
        self.outcomes.insert(task, Err(err));
        self
    }

    fn restarts_after(mut self, task: Task) -> Self {
        self.restart_after = Some(task);
        self
    }
}

impl TaskRunner for ScriptedRunner {
    async fn run_task(&mut self, task: Task) -> Result<FollowUps, TaskError> {
        assert_eq!(self.events.last(), Some(&(task, EventStatus::Start)));
        self.ran.push(task);
        if self.restart_after == Some(task) {
            self.restart_requested = true;
        }
        self.outcomes.get(&task).cloned().unwrap_or(Ok(FollowUps::new()))
    }

    fn record(&mut self, task: Task, status: EventStatus) {
        self.events.push((task, status));
    }

    fn feed_watchdog(&mut self) {
        self.feeds += 1;
    }

    fn halt_requested(&self) -> bool {
        self.restart_requested
    }
}

fn pending(reactor: &Reactor) -> Vec<Task> {
    reactor.pending().collect()
}

#[test]
fn prerequisites_are_queued_first() {
    let mut reactor = Reactor::new();
    reactor.push_tasks(&[Task::TakeMeasurement]).unwrap();
    assert_eq!(pending(&reactor), vec![Task::SyncRtc, Task::TakeMeasurement]);

    reactor.push_tasks(&[Task::Communicate]).unwrap();
    assert_eq!(
        pending(&reactor),
        vec![Task::SyncRtc, Task::Communicate, Task::TakeMeasurement]
    );
}

#[test]
fn prerequisites_already_run_are_not_repeated() {
    let mut reactor = Reactor::new();
    let mut runner = ScriptedRunner::default().returns(Task::TakeMeasurement, &[Task::Communicate]);
    reactor.push_tasks(&[Task::TakeMeasurement]).unwrap();
    block_on(reactor.run(&mut runner)).unwrap();

    assert_eq!(
        runner.ran,
        vec![Task::SyncRtc, Task::TakeMeasurement, Task::Communicate]
    );
}

#[test]
fn follow_ups_run_before_queued_siblings() {
    let mut reactor = Reactor::new();
    let mut runner = ScriptedRunner::default()
        .returns(Task::SelfTest, &[Task::InstallUpdates, Task::Communicate]);
    reactor
        .push_tasks(&[Task::SelfTest, Task::TakeMeasurement])
        .unwrap();
    block_on(reactor.run(&mut runner)).unwrap();

    assert_eq!(
        runner.ran,
        vec![
            Task::SelfTest,
            Task::InstallUpdates,
            Task::SyncRtc,
            Task::Communicate,
            Task::TakeMeasurement,
        ]
    );
    assert_eq!(reactor.history(), runner.ran.as_slice());
    assert!(runner.feeds >= 5);
}

#[test]
fn start_and_outcome_bracket_every_task() {
    let mut reactor = Reactor::new();
    let mut runner = ScriptedRunner::default().fails(Task::SyncRtc, TaskError::Link);
    reactor.push_tasks(&[Task::SyncRtc, Task::InstallUpdates]).unwrap();
    block_on(reactor.run(&mut runner)).unwrap();

    assert_eq!(
        runner.events,
        vec![
            (Task::SyncRtc, EventStatus::Start),
            (Task::SyncRtc, EventStatus::Fail),
            (Task::InstallUpdates, EventStatus::Start),
            (Task::InstallUpdates, EventStatus::Ok),
        ]
    );
}

#[test]
fn failure_drops_only_that_task() {
    let mut reactor = Reactor::new();
    let mut runner = ScriptedRunner::default()
        .fails(Task::SelfTest, TaskError::NoSdCard)
        .returns(Task::InstallUpdates, &[]);
    reactor
        .push_tasks(&[Task::SelfTest, Task::TakeMeasurement])
        .unwrap();
    block_on(reactor.run(&mut runner)).unwrap();

    assert_eq!(reactor.failed(), &[Task::SelfTest]);
    assert_eq!(
        runner.ran,
        vec![Task::SelfTest, Task::SyncRtc, Task::TakeMeasurement]
    );
}

#[test]
fn cancellation_aborts_the_episode() {
    let mut reactor = Reactor::new();
    let mut runner = ScriptedRunner::default().fails(Task::SyncRtc, TaskError::Cancelled);
    reactor
        .push_tasks(&[Task::TakeMeasurement, Task::InstallUpdates])
        .unwrap();

    let result = block_on(reactor.run(&mut runner));
    assert_eq!(result, Err(ReactorError::Cancelled));
    assert_eq!(runner.ran, vec![Task::SyncRtc]);
    assert_eq!(runner.events, vec![(Task::SyncRtc, EventStatus::Start)]);
    assert!(reactor.failed().is_empty());
}

#[test]
fn dependency_cycle_is_reported() {
    fn cyclic(task: Task) -> &'static [Task] {
        match task {
            Task::SelfTest => &[Task::SyncRtc],
            Task::SyncRtc => &[Task::InstallUpdates],
            Task::InstallUpdates => &[Task::SelfTest],
            _ => &[],
        }
    }

    let mut reactor = Reactor::with_deps(cyclic);
    assert_eq!(
        reactor.push_tasks(&[Task::SelfTest]),
        Err(ReactorError::DependencyCycle(Task::SelfTest))
    );
}

#[test]
fn default_table_has_no_cycles() {
    let ordered: heapless::Vec<Task, MAX_QUEUE> = resolve_order(&Task::ALL, &[], Task::deps).unwrap();
    assert_eq!(ordered.len(), Task::ALL.len());
}

#[test]
fn self_requeueing_task_hits_the_episode_limit() {
    let mut reactor = Reactor::new();
    let mut runner = ScriptedRunner::default().returns(Task::InstallUpdates, &[Task::InstallUpdates]);
    reactor.push_tasks(&[Task::InstallUpdates]).unwrap();

    let result = block_on(reactor.run(&mut runner));
    assert_eq!(result, Err(ReactorError::TooManyTasks));
    assert_eq!(runner.ran.len(), MAX_TASKS_PER_EPISODE);
}

#[test]
fn requested_restart_discards_the_rest_of_the_queue() {
    let mut reactor = Reactor::new();
    let mut runner = ScriptedRunner::default()
        .returns(Task::SelfTest, &[Task::InstallUpdates, Task::Communicate])
        .restarts_after(Task::InstallUpdates);
    reactor
        .push_tasks(&[Task::SelfTest, Task::TakeMeasurement])
        .unwrap();

    block_on(reactor.run(&mut runner)).unwrap();
    assert_eq!(runner.ran, vec![Task::SelfTest, Task::InstallUpdates]);
    assert_eq!(runner.events.last(), Some(&(Task::InstallUpdates, EventStatus::Ok)));
    assert!(pending(&reactor).is_empty());
}

#[test]
fn follow_ups_beyond_queue_limit_are_dropped() {
    let mut reactor = Reactor::new().with_queue_limit(2);
    let mut runner = ScriptedRunner::default()
        .returns(Task::SelfTest, &[Task::InstallUpdates, Task::Communicate]);
    reactor.push_tasks(&[Task::SelfTest]).unwrap();

    // Communicate would need SyncRtc as well, which no longer fits.
    block_on(reactor.run(&mut runner)).unwrap();
    assert_eq!(runner.ran, vec![Task::SelfTest, Task::InstallUpdates]);
    assert!(reactor.failed().is_empty());
}

#[test]
fn over_limit_push_leaves_queue_untouched() {
    let mut reactor = Reactor::new().with_queue_limit(2);
    reactor.push_tasks(&[Task::InstallUpdates]).unwrap();

    assert_eq!(
        reactor.push_tasks(&[Task::Communicate]),
        Err(ReactorError::QueueFull)
    );
    assert_eq!(pending(&reactor), vec![Task::InstallUpdates]);
}

#[test]
fn repeated_tasks_are_queued_once() {
    let mut reactor = Reactor::new();
    reactor
        .push_tasks(&[Task::SelfTest, Task::InstallUpdates, Task::SelfTest])
        .unwrap();
    assert_eq!(pending(&reactor), vec![Task::SelfTest, Task::InstallUpdates]);
}
