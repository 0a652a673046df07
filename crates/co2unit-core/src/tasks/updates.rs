//! Installation of pulled update directories.

use alloc::{format, string::String, vec::Vec};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    board::{Board, Updater},
    context::DeviceContext,
    error_log::Severity,
    fs::{FileSystem, FsError, join, split_parent},
    state_file,
    task::{FollowUps, Task, TaskError},
};

/// Failed installs of the same update before it is left alone.
pub const MAX_INSTALL_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateState {
    pub installed: Option<String>,
    pub failed: Option<String>,
    pub attempts: u32,
}

pub fn run<B: Board>(ctx: &mut DeviceContext<B>) -> Result<FollowUps, TaskError> {
    let layout = ctx.layout;
    let mut state: UpdateState = state_file::load_or_default(&mut ctx.fs, layout.updates_state_path);

    let Some(newest) = newest_update(&mut ctx.fs, layout.updates_dir, layout.update_prefix)? else {
        info!("updates: nothing downloaded");
        return Ok(FollowUps::new());
    };
    if state.installed.as_deref() == Some(newest.as_str()) {
        info!("updates: up to date name={}", newest);
        return Ok(FollowUps::new());
    }
    if state.failed.as_deref() == Some(newest.as_str()) && state.attempts >= MAX_INSTALL_ATTEMPTS {
        warn!("updates: giving up on name={} attempts={}", newest, state.attempts);
        return Ok(FollowUps::new());
    }

    info!("updates: installing name={}", newest);
    let result = ctx.updater.install(&mut ctx.fs, &join(layout.updates_dir, &newest));
    match &result {
        Ok(()) => {
            state.installed = Some(newest.clone());
            state.failed = None;
            state.attempts = 0;
        }
        Err(_) => {
            if state.failed.as_deref() != Some(newest.as_str()) {
                state.failed = Some(newest.clone());
                state.attempts = 0;
            }
            state.attempts += 1;
        }
    }
    save_state(ctx, &state);

    match result {
        Ok(()) => {
            info!("updates: installed name={}; reboot requested", newest);
            ctx.request_reboot(Task::SelfTest);
            Ok(FollowUps::new())
        }
        Err(err) => {
            ctx.report(
                Severity::Exception,
                &format!("install of {} failed: {:?}", newest, err),
            );
            Err(TaskError::Install)
        }
    }
}

fn save_state<B: Board>(ctx: &mut DeviceContext<B>, state: &UpdateState) {
    let path = ctx.layout.updates_state_path;
    let (parent, _) = split_parent(path);
    let saved = ctx
        .fs
        .create_dir_all(parent)
        .and_then(|()| state_file::save(&mut ctx.fs, path, state));
    if let Err(err) = saved {
        warn!("updates: state save failed err={:?}", err);
    }
}

/// Newest complete update directory by name. Staging directories never match
/// because they carry the temporary prefix in front.
fn newest_update<F: FileSystem + ?Sized>(fs: &mut F, dir: &str, prefix: &str) -> Result<Option<String>, FsError> {
    let names = match fs.list_dir(dir) {
        Ok(names) => names,
        Err(FsError::NotFound) => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut candidates = Vec::new();
    for name in names.into_iter().filter(|name| name.starts_with(prefix)) {
        if fs.is_dir(&join(dir, &name))? {
            candidates.push(name);
        }
    }
    candidates.sort();
    Ok(candidates.pop())
}

/// Copies every file of the update directory onto the card root, keeping
/// relative paths. An update ships files such as `conf/device.json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileCopyUpdater;

impl Updater for FileCopyUpdater {
    type Error = FsError;

    fn install<F: FileSystem + ?Sized>(&mut self, fs: &mut F, update_dir: &str) -> Result<(), Self::Error> {
        let mut pending = Vec::from([String::new()]);
        while let Some(rel_dir) = pending.pop() {
            let src_dir = join(update_dir, &rel_dir);
            for name in fs.list_dir(&src_dir)? {
                let rel = join(&rel_dir, &name);
                let src = join(update_dir, &rel);
                if fs.is_dir(&src)? {
                    pending.push(rel);
                    continue;
                }
                let data = fs.read_to_vec(&src)?;
                let (parent, _) = split_parent(&rel);
                fs.create_dir_all(parent)?;
                fs.write_file(&rel, &data)?;
                info!("updates: copied {}", rel);
            }
        }
        Ok(())
    }
}
