use log::info;

use crate::{
    board::Board,
    context::DeviceContext,
    error_log::Severity,
    rtc::{self, Reconciliation},
    task::{FollowUps, TaskError},
};

/// Reconciles the two clocks. Having no reliable time is reported, not fatal.
pub fn run<B: Board>(ctx: &mut DeviceContext<B>) -> Result<FollowUps, TaskError> {
    let outcome = rtc::reconcile(
        &mut ctx.internal_clock,
        &mut ctx.external_clock,
        ctx.config.drift_tolerance_secs,
        true,
    )?;
    info!("rtc sync: outcome={:?}", outcome);
    if outcome == Reconciliation::NoReliableTime {
        ctx.report(Severity::Warning, "no reliable time source");
    }
    Ok(FollowUps::new())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeDelta};

    use super::*;
    use crate::testing::{FakeClock, test_context};

    #[test]
    fn drifted_internal_clock_follows_external() {
        let external = NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap();
        let mut ctx = test_context(external);
        ctx.internal_clock = FakeClock::at(external + TimeDelta::seconds(30));

        run(&mut ctx).unwrap();
        assert_eq!(ctx.internal_clock.time, Some(external));
        assert_eq!(ctx.external_clock.writes, 0);
    }

    #[test]
    fn no_time_source_is_tolerated() {
        let epoch = NaiveDate::from_ymd_opt(2000, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let mut ctx = test_context(epoch);

        assert!(run(&mut ctx).unwrap().is_empty());
        assert_eq!(ctx.internal_clock.writes, 0);
    }

    #[test]
    fn failed_clock_write_fails_the_task() {
        let external = NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap();
        let mut ctx = test_context(external);
        ctx.internal_clock = FakeClock::broken();
        ctx.internal_clock.fail_writes = true;

        assert_eq!(
            run(&mut ctx),
            Err(TaskError::Clock(rtc::RtcError::InternalWrite))
        );
    }
}
