//! Human-readable incident log on the SD card (`errors/errors-NNNN.txt`).

use alloc::{format, string::String};

use chrono::NaiveDateTime;
use log::warn;

use crate::{
    config::{ERRORS_SIZE_LIMIT, FileLayout},
    fs::FileSystem,
    seqfile::choose_append_file,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    Exception,
    Warning,
    Info,
}

impl Severity {
    pub const fn label(self) -> &'static str {
        match self {
            Severity::Exception => "EXC",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        }
    }
}

/// Appends one entry. Failures are logged and swallowed.
pub fn record<F: FileSystem + ?Sized>(
    fs: &mut F,
    layout: &FileLayout,
    now: Option<NaiveDateTime>,
    severity: Severity,
    message: &str,
) {
    let stamp = match now {
        Some(now) => format!("{}", now.format("%Y-%m-%d %H:%M:%S")),
        None => String::from("????-??-?? ??:??:??"),
    };
    let line = format!("----- {} {:5} {}\n", stamp, severity.label(), message);

    let result = choose_append_file(fs, layout.errors_dir, layout.errors, ERRORS_SIZE_LIMIT)
        .and_then(|path| fs.append(&path, line.as_bytes()));
    if let Err(err) = result {
        warn!("error log: write failed err={:?} message={}", err, message);
    }
}
