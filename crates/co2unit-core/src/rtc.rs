//! Reconciliation between the volatile internal clock and the battery-backed
//! external clock, optionally corrected from network time.

use chrono::{Datelike, NaiveDateTime};
use log::{info, warn};

use crate::board::Clock;

/// Clocks reset to their epoch default report years at or below this.
pub const PLAUSIBLE_AFTER_YEAR: i32 = 2010;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RtcError {
    NoReliableTime,
    InternalWrite,
    ExternalWrite,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reconciliation {
    InSync,
    InternalFromExternal,
    ExternalFromInternal,
    NoReliableTime,
}

pub fn is_plausible(time: &NaiveDateTime) -> bool {
    time.year() > PLAUSIBLE_AFTER_YEAR
}

/// Reads `clock`, discarding failed reads and implausible values.
pub fn plausible_now<C: Clock + ?Sized>(clock: &mut C) -> Option<NaiveDateTime> {
    match clock.now() {
        Ok(time) if is_plausible(&time) => Some(time),
        Ok(_) => None,
        Err(err) => {
            warn!("rtc: read failed err={:?}", err);
            None
        }
    }
}

fn drift_secs(a: NaiveDateTime, b: NaiveDateTime) -> u64 {
    (a - b).num_seconds().unsigned_abs()
}

/// Plausible readings of both clocks taken at the same moment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClockPair {
    pub internal: Option<NaiveDateTime>,
    pub external: Option<NaiveDateTime>,
}

impl ClockPair {
    pub fn read<I: Clock + ?Sized, E: Clock + ?Sized>(internal: &mut I, external: &mut E) -> Self {
        Self {
            internal: plausible_now(internal),
            external: plausible_now(external),
        }
    }

    pub fn decide(&self, tolerance_secs: u32) -> Reconciliation {
        match (self.internal, self.external) {
            (Some(internal), Some(external)) => {
                if drift_secs(internal, external) <= u64::from(tolerance_secs) {
                    Reconciliation::InSync
                } else {
                    Reconciliation::InternalFromExternal
                }
            }
            (None, Some(_)) => Reconciliation::InternalFromExternal,
            (Some(_), None) => Reconciliation::ExternalFromInternal,
            (None, None) => Reconciliation::NoReliableTime,
        }
    }
}

/// Brings both clocks into agreement. The battery-backed clock wins a disagreement.
///
/// With no plausible clock the result is `Err(NoReliableTime)` unless
/// `tolerate_no_source` is set, in which case `Ok(NoReliableTime)` is returned.
pub fn reconcile<I: Clock + ?Sized, E: Clock + ?Sized>(
    internal: &mut I,
    external: &mut E,
    tolerance_secs: u32,
    tolerate_no_source: bool,
) -> Result<Reconciliation, RtcError> {
    let pair = ClockPair::read(internal, external);
    let decision = pair.decide(tolerance_secs);

    match (decision, pair.internal, pair.external) {
        (Reconciliation::InternalFromExternal, _, Some(external_now)) => {
            info!(
                "rtc: internal <- external internal={:?} external={}",
                pair.internal, external_now
            );
            internal
                .set(external_now)
                .map_err(|_| RtcError::InternalWrite)?;
        }
        (Reconciliation::ExternalFromInternal, Some(internal_now), _) => {
            info!("rtc: external <- internal internal={}", internal_now);
            external
                .set(internal_now)
                .map_err(|_| RtcError::ExternalWrite)?;
        }
        (Reconciliation::NoReliableTime, _, _) => {
            if !tolerate_no_source {
                return Err(RtcError::NoReliableTime);
            }
            warn!("rtc: no reliable time source");
        }
        _ => {}
    }
    Ok(decision)
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NetworkCorrection {
    pub internal_set: bool,
    pub external_set: bool,
}

/// Applies network time to both clocks. Each clock is only written when it
/// is implausible or drifted beyond the tolerance.
pub fn reconcile_network<I: Clock + ?Sized, E: Clock + ?Sized>(
    internal: &mut I,
    external: &mut E,
    network_now: NaiveDateTime,
    tolerance_secs: u32,
) -> Result<NetworkCorrection, RtcError> {
    if !is_plausible(&network_now) {
        return Err(RtcError::NoReliableTime);
    }

    let needs_write = |current: Option<NaiveDateTime>| {
        current.is_none_or(|now| drift_secs(now, network_now) > u64::from(tolerance_secs))
    };

    let mut correction = NetworkCorrection::default();
    if needs_write(plausible_now(internal)) {
        internal
            .set(network_now)
            .map_err(|_| RtcError::InternalWrite)?;
        correction.internal_set = true;
    }
    if needs_write(plausible_now(external)) {
        external
            .set(network_now)
            .map_err(|_| RtcError::ExternalWrite)?;
        correction.external_set = true;
    }
    if correction.internal_set || correction.external_set {
        info!(
            "rtc: network time applied time={} internal={} external={}",
            network_now, correction.internal_set, correction.external_set
        );
    }
    Ok(correction)
}
