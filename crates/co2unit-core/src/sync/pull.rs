use alloc::{format, string::String, vec::Vec};

use log::{info, warn};

use super::SyncError;
use crate::{
    board::Platform,
    fs::{FileSystem, FsError, join, split_parent},
    http::{HttpClient, Method},
};

#[derive(Clone, Copy, Debug)]
pub struct PullTarget<'a> {
    /// Server base URL without trailing slash.
    pub server: &'a str,
    pub remote_dir: &'a str,
    pub local_dir: &'a str,
    /// Prefix of the staging directory next to the final one.
    pub tmp_prefix: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PullOutcome {
    /// The server answered 404 for the remote directory.
    RemoteMissing,
    /// The remote directory exists but is empty.
    NothingRemote,
    UpToDate { name: String },
    Fetched { name: String, files: usize },
}

impl PullOutcome {
    pub fn fetched(&self) -> bool {
        matches!(self, PullOutcome::Fetched { .. })
    }
}

/// Fetches the newest remote subdirectory that is not present locally.
///
/// Files land in `{local_dir}/{tmp_prefix}{name}` first; the rename to
/// `{local_dir}/{name}` is the last step. A staging directory left over from
/// an interrupted pull is removed; completed directories are never touched.
pub async fn pull_last_dir<F, H, P>(
    fs: &mut F,
    http: &mut H,
    platform: &mut P,
    target: &PullTarget<'_>,
) -> Result<PullOutcome, SyncError>
where
    F: FileSystem + ?Sized,
    H: HttpClient + ?Sized,
    P: Platform + ?Sized,
{
    let list_url = format!("{}/{}?recursive=false", target.server, target.remote_dir);
    let Some(mut remote) = fetch_listing(http, &list_url).await? else {
        info!("pull: remote dir missing dir={}", target.remote_dir);
        return Ok(PullOutcome::RemoteMissing);
    };

    fs.create_dir_all(target.local_dir)?;
    discard_partial_pulls(fs, target)?;

    remote.retain(|name| !name.is_empty() && !name.starts_with(target.tmp_prefix));
    remote.sort();
    let Some(name) = remote.pop() else {
        return Ok(PullOutcome::NothingRemote);
    };
    if !is_safe_relative(&name) || name.contains('/') {
        return Err(SyncError::BadListing);
    }

    let final_dir = join(target.local_dir, &name);
    if fs.exists(&final_dir)? {
        info!("pull: up to date name={}", name);
        return Ok(PullOutcome::UpToDate { name });
    }

    let files_url = format!("{}/{}/{}?recursive=true", target.server, target.remote_dir, name);
    let files = fetch_listing(http, &files_url)
        .await?
        .ok_or(SyncError::Status(404))?;

    let tmp_dir = join(target.local_dir, &format!("{}{}", target.tmp_prefix, name));
    fs.create_dir_all(&tmp_dir)?;

    let mut fetched = 0usize;
    for rel in files.iter().filter(|rel| !rel.is_empty() && !rel.ends_with('/')) {
        if !is_safe_relative(rel) {
            return Err(SyncError::BadListing);
        }
        platform.feed_watchdog();
        if platform.cancel_requested() {
            return Err(SyncError::Cancelled);
        }

        let url = format!("{}/{}/{}/{}", target.server, target.remote_dir, name, rel);
        let response = http.request(Method::Get, &url, &[]).await?;
        if response.status != 200 {
            return Err(SyncError::Status(response.status));
        }

        let dest = join(&tmp_dir, rel);
        let (parent, _) = split_parent(&dest);
        fs.create_dir_all(parent)?;
        fs.write_file(&dest, &response.body)?;
        fetched += 1;
    }

    fs.rename(&tmp_dir, &final_dir)?;
    info!("pull: fetched name={} files={}", name, fetched);
    Ok(PullOutcome::Fetched {
        name,
        files: fetched,
    })
}

/// `Ok(None)` when the server answers 404.
async fn fetch_listing<H: HttpClient + ?Sized>(
    http: &mut H,
    url: &str,
) -> Result<Option<Vec<String>>, SyncError> {
    let response = http.request(Method::Get, url, &[]).await?;
    match response.status {
        200 => serde_json::from_slice(&response.body)
            .map(Some)
            .map_err(|_| SyncError::BadListing),
        404 => Ok(None),
        status => Err(SyncError::Status(status)),
    }
}

fn discard_partial_pulls<F: FileSystem + ?Sized>(
    fs: &mut F,
    target: &PullTarget<'_>,
) -> Result<(), FsError> {
    let names = fs.list_dir(target.local_dir)?;
    for name in names {
        let Some(final_name) = name.strip_prefix(target.tmp_prefix) else {
            continue;
        };
        warn!("pull: discarding partial pull name={}", final_name);
        fs.remove_dir_all(&join(target.local_dir, &name))?;
    }
    Ok(())
}

fn is_safe_relative(path: &str) -> bool {
    !path.starts_with('/') && path.split('/').all(|part| part != ".." && part != ".")
}
