//! Communication episode: link up, clock correction, then push and pull
//! against every configured destination.

use alloc::{format, string::String};

use log::{info, warn};

use crate::{
    backoff::ConnectBackoff,
    board::{Board, NetworkTime, Platform},
    config::Destination,
    context::DeviceContext,
    error_log::Severity,
    http::{HttpClient, HttpError, Method},
    modem::{ModemError, close_link, open_link},
    rtc,
    sync::{
        PullOutcome, PullTarget, PushLimits, PushOutcome, PushTarget, SyncError, pull_last_dir, push_sequential,
        push_state_stem,
    },
    task::{FollowUps, Task, TaskError},
};

/// Why one destination could not be served.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommError {
    Alive(HttpError),
    AliveStatus(u16),
    Push { dir: String, err: SyncError },
    Pull(SyncError),
    Cancelled,
}

impl CommError {
    fn from_sync(err: SyncError, wrap: impl FnOnce(SyncError) -> CommError) -> CommError {
        match err {
            SyncError::Cancelled => CommError::Cancelled,
            other => wrap(other),
        }
    }
}

pub async fn run<B: Board>(ctx: &mut DeviceContext<B>) -> Result<FollowUps, TaskError> {
    let mut backoff = ConnectBackoff::load(&mut ctx.nvs).unwrap_or_else(|err| {
        warn!("communicate: backoff state unreadable err={:?}", err);
        ConnectBackoff::default()
    });
    if !backoff.should_attempt() {
        save_backoff(ctx, &backoff);
        return Ok(FollowUps::new());
    }

    let result = match open_link(&mut ctx.modem, &mut ctx.platform).await {
        Ok(()) => {
            backoff.record_success();
            save_backoff(ctx, &backoff);
            session(ctx).await
        }
        Err(ModemError::Cancelled) => Err(TaskError::Cancelled),
        Err(err) => {
            backoff.record_failure(ctx.config.backoff_max);
            save_backoff(ctx, &backoff);
            ctx.report(
                Severity::Warning,
                &format!("link failed: {:?} backoff={}", err, backoff.backoff_threshold),
            );
            Err(TaskError::Link)
        }
    };

    close_link(&mut ctx.modem, &mut ctx.platform).await;
    result
}

fn save_backoff<B: Board>(ctx: &mut DeviceContext<B>, backoff: &ConnectBackoff) {
    if let Err(err) = backoff.save(&mut ctx.nvs) {
        warn!("communicate: backoff save failed err={:?}", err);
    }
}

async fn session<B: Board>(ctx: &mut DeviceContext<B>) -> Result<FollowUps, TaskError> {
    sync_network_time(ctx).await;

    let destinations = ctx.config.destinations.clone();
    let mut fetched = false;
    for destination in destinations.iter() {
        match serve_destination(ctx, destination).await {
            Ok(pulled) => fetched |= pulled,
            Err(CommError::Cancelled) => return Err(TaskError::Cancelled),
            Err(err) => {
                warn!("communicate: destination={} err={:?}", destination.name, err);
                ctx.report(
                    Severity::Exception,
                    &format!("sync with {} failed: {:?}", destination.name, err),
                );
            }
        }
    }

    let mut follow_ups = FollowUps::new();
    if fetched {
        let _ = follow_ups.push(Task::InstallUpdates);
    }
    Ok(follow_ups)
}

async fn sync_network_time<B: Board>(ctx: &mut DeviceContext<B>) {
    ctx.platform.feed_watchdog();
    let network_now = match ctx.ntp.fetch().await {
        Ok(now) => now,
        Err(err) => {
            warn!("communicate: network time unavailable err={:?}", err);
            return;
        }
    };
    if let Err(err) = rtc::reconcile_network(
        &mut ctx.internal_clock,
        &mut ctx.external_clock,
        network_now,
        ctx.config.drift_tolerance_secs,
    ) {
        warn!("communicate: network time not applied err={:?}", err);
    }
}

/// Returns whether an update was pulled. The first failing step ends the
/// work for this destination.
async fn serve_destination<B: Board>(
    ctx: &mut DeviceContext<B>,
    destination: &Destination,
) -> Result<bool, CommError> {
    let server = destination.url.trim_end_matches('/');
    info!("communicate: destination={} url={}", destination.name, server);

    let unit = serde_json::to_vec(&ctx.unit).unwrap_or_default();
    let alive = ctx
        .http
        .request(Method::Post, &format!("{}/alive", server), &unit)
        .await
        .map_err(CommError::Alive)?;
    if alive.status != 200 {
        return Err(CommError::AliveStatus(alive.status));
    }

    let limits = PushLimits {
        chunk_size: ctx.config.chunk_size,
        budget_ms: u64::from(ctx.config.sync_budget_secs) * 1000,
    };
    let push_dirs = ctx.config.push_dirs.clone();
    for dir in push_dirs.iter() {
        let remote_dir = format!("{}/{}", ctx.unit.hw_id, dir);
        let state_path = format!(
            "{}/{}{}",
            ctx.layout.sync_state_dir,
            push_state_stem(server, dir),
            ctx.layout.state_suffix
        );
        let target = PushTarget {
            server,
            local_dir: dir,
            remote_dir: &remote_dir,
            state_path: &state_path,
        };
        let report = push_sequential(&mut ctx.fs, &mut ctx.http, &mut ctx.platform, &target, limits)
            .await
            .map_err(|err| {
                CommError::from_sync(err, |err| CommError::Push {
                    dir: dir.clone(),
                    err,
                })
            })?;
        if report.outcome == PushOutcome::BudgetExhausted {
            info!("communicate: push budget exhausted dir={}", dir);
        }
    }

    if !(ctx.layout.supports_pull && ctx.config.pull_updates) {
        return Ok(false);
    }
    let target = PullTarget {
        server,
        remote_dir: &ctx.config.remote_updates_dir,
        local_dir: ctx.layout.updates_dir,
        tmp_prefix: ctx.layout.tmp_prefix,
    };
    let outcome = pull_last_dir(&mut ctx.fs, &mut ctx.http, &mut ctx.platform, &target)
        .await
        .map_err(|err| CommError::from_sync(err, CommError::Pull))?;
    if outcome == PullOutcome::RemoteMissing {
        info!("communicate: no updates published by {}", destination.name);
    }
    Ok(outcome.fetched())
}
