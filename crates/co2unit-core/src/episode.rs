//! One power-on episode from boot to sleep.

use alloc::format;

use log::{error, info, warn};

use crate::{
    board::Board,
    boot::{self, ResetCause},
    context::DeviceContext,
    error_log::Severity,
    reactor::{Reactor, ReactorError},
    task::Task,
};

/// Sleep used when no schedule can be computed.
pub const LAST_RESORT_SLEEP_SECS: u32 = 300;
pub const MIN_SLEEP_SECS: u32 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EpisodeEnd {
    Sleep { seconds: u32, next: Option<Task> },
    /// Restart now and run `next` on the way back up.
    Reboot { next: Task },
    /// Operator interrupt. The board stays awake.
    Cancelled,
}

/// Resolves the boot plan, runs it, and decides how the episode ends.
///
/// The breadcrumb for the next wake is written before this returns, so the
/// caller only has to act on the result.
pub async fn run_episode<B: Board>(ctx: &mut DeviceContext<B>, cause: ResetCause) -> EpisodeEnd {
    ctx.load_config();
    let plan = boot::resolve(&mut ctx.nvs, cause);
    if let Some(task) = plan.crash_loop {
        ctx.report(
            Severity::Exception,
            &format!("crash loop in {} after {} resets", task, boot::CRASH_LOOP_LIMIT),
        );
    }

    let mut reactor = Reactor::new();
    let result = match reactor.push_tasks(&plan.queue) {
        Ok(()) => reactor.run(ctx).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => info!(
            "episode: tasks done ran={:?} failed={:?}",
            reactor.history(),
            reactor.failed()
        ),
        Err(ReactorError::Cancelled) => {
            warn!("episode: cancelled by operator");
            return EpisodeEnd::Cancelled;
        }
        Err(err) => {
            error!("episode: reactor aborted err={:?}", err);
            ctx.report(Severity::Exception, &format!("reactor aborted: {:?}", err));
        }
    }

    epilogue(ctx)
}

/// Persists the next breadcrumb and picks the sleep length.
pub fn epilogue<B: Board>(ctx: &mut DeviceContext<B>) -> EpisodeEnd {
    if let Some(next) = ctx.reboot_requested() {
        persist_breadcrumb(ctx, Some(next));
        info!("episode: reboot next={}", next);
        return EpisodeEnd::Reboot { next };
    }

    let Some(now) = ctx.now() else {
        warn!("episode: no plausible time; last resort sleep");
        persist_breadcrumb(ctx, None);
        return last_resort();
    };

    let Some(obligation) = ctx.schedule.next_obligation(now, &mut ctx.rng) else {
        warn!("episode: empty schedule; last resort sleep");
        persist_breadcrumb(ctx, None);
        return last_resort();
    };

    persist_breadcrumb(ctx, Some(obligation.task));
    let seconds = obligation.seconds_until.max(MIN_SLEEP_SECS);
    info!(
        "episode: sleep seconds={} next={} at={}",
        seconds, obligation.task, obligation.at
    );
    EpisodeEnd::Sleep {
        seconds,
        next: Some(obligation.task),
    }
}

fn last_resort() -> EpisodeEnd {
    EpisodeEnd::Sleep {
        seconds: LAST_RESORT_SLEEP_SECS,
        next: None,
    }
}

fn persist_breadcrumb<B: Board>(ctx: &mut DeviceContext<B>, next: Option<Task>) {
    if let Err(err) = boot::write_breadcrumb(&mut ctx.nvs, next) {
        error!("episode: breadcrumb write failed err={:?}", err);
    }
}
