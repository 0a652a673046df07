//! One sensor reading appended to the readings sequence.

use alloc::{format, string::String};
use core::fmt::Write;

use chrono::NaiveDateTime;
use log::{info, warn};

use crate::{
    board::{Board, Reading, Sensors},
    config::READINGS_SIZE_LIMIT,
    context::DeviceContext,
    fs::FileSystem,
    rtc::RtcError,
    seqfile::choose_append_file,
    task::{FollowUps, TaskError},
};

pub fn run<B: Board>(ctx: &mut DeviceContext<B>) -> Result<FollowUps, TaskError> {
    let now = ctx.now().ok_or(TaskError::Clock(RtcError::NoReliableTime))?;
    let reading = ctx.sensors.read().map_err(|err| {
        warn!("measure: sensor read failed err={:?}", err);
        TaskError::Sensor
    })?;

    let row = format_row(now, &reading);
    let path = choose_append_file(
        &mut ctx.fs,
        ctx.layout.readings_dir,
        ctx.layout.readings,
        READINGS_SIZE_LIMIT,
    )?;
    ctx.fs.append(&path, row.as_bytes())?;
    info!("measure: appended path={} co2={:?}", path, reading.co2_ppm);
    Ok(FollowUps::new())
}

/// `date \t time \t temperature \t co2...` terminated by a newline. A missing
/// temperature leaves its column empty.
pub fn format_row(now: NaiveDateTime, reading: &Reading) -> String {
    let mut row = format!("{}\t{}\t", now.format("%Y-%m-%d"), now.format("%H:%M:%S"));
    if let Some(temperature) = reading.temperature_c {
        let _ = write!(row, "{:.2}", temperature);
    }
    for co2 in &reading.co2_ppm {
        let _ = write!(row, "\t{}", co2);
    }
    row.push('\n');
    row
}
