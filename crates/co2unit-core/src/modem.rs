//! Network link lifecycle on top of a polled modem driver.

use log::{info, warn};

use crate::{
    board::Platform,
    poll::{PollError, wait_for},
};

pub const ATTACH_TIMEOUT_MS: u64 = 120_000;
pub const CONNECT_TIMEOUT_MS: u64 = 120_000;
pub const TEARDOWN_TIMEOUT_MS: u64 = 10_000;
const POLL_INTERVAL_MS: u32 = 500;

/// Modem driver. Every state change is requested and then polled; none is
/// assumed to be instantaneous.
#[allow(async_fn_in_trait)]
pub trait Modem {
    type Error: core::fmt::Debug;

    async fn attach(&mut self) -> Result<(), Self::Error>;
    fn is_attached(&mut self) -> bool;
    async fn connect(&mut self) -> Result<(), Self::Error>;
    fn is_connected(&mut self) -> bool;
    async fn disconnect(&mut self) -> Result<(), Self::Error>;
    async fn detach(&mut self) -> Result<(), Self::Error>;
    async fn deinit(&mut self) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModemError {
    Attach,
    AttachTimeout,
    Connect,
    ConnectTimeout,
    Cancelled,
}

fn map_poll(err: PollError, timeout: ModemError) -> ModemError {
    match err {
        PollError::Cancelled => ModemError::Cancelled,
        PollError::Timeout { .. } => timeout,
    }
}

/// Attaches and connects. On failure the caller must still run [`close_link`].
pub async fn open_link<M, P>(modem: &mut M, platform: &mut P) -> Result<(), ModemError>
where
    M: Modem + ?Sized,
    P: Platform + ?Sized,
{
    info!("link: attaching");
    if let Err(err) = modem.attach().await {
        warn!("link: attach request failed err={:?}", err);
        return Err(ModemError::Attach);
    }
    let waited = wait_for(
        platform,
        || modem.is_attached(),
        ATTACH_TIMEOUT_MS,
        POLL_INTERVAL_MS,
    )
    .await
    .map_err(|err| map_poll(err, ModemError::AttachTimeout))?;
    info!("link: attached after {}ms", waited);

    if let Err(err) = modem.connect().await {
        warn!("link: connect request failed err={:?}", err);
        return Err(ModemError::Connect);
    }
    let waited = wait_for(
        platform,
        || modem.is_connected(),
        CONNECT_TIMEOUT_MS,
        POLL_INTERVAL_MS,
    )
    .await
    .map_err(|err| map_poll(err, ModemError::ConnectTimeout))?;
    info!("link: connected after {}ms", waited);
    Ok(())
}

/// Disconnects, detaches and deinitialises. Every step is attempted even
/// when an earlier one fails.
pub async fn close_link<M, P>(modem: &mut M, platform: &mut P)
where
    M: Modem + ?Sized,
    P: Platform + ?Sized,
{
    if modem.is_connected() {
        match modem.disconnect().await {
            Ok(()) => {
                let waited = wait_for(
                    platform,
                    || !modem.is_connected(),
                    TEARDOWN_TIMEOUT_MS,
                    POLL_INTERVAL_MS,
                )
                .await;
                if let Err(err) = waited {
                    warn!("link: disconnect not confirmed err={:?}", err);
                }
            }
            Err(err) => warn!("link: disconnect failed err={:?}", err),
        }
    }

    if modem.is_attached() {
        match modem.detach().await {
            Ok(()) => {
                let waited = wait_for(
                    platform,
                    || !modem.is_attached(),
                    TEARDOWN_TIMEOUT_MS,
                    POLL_INTERVAL_MS,
                )
                .await;
                if let Err(err) = waited {
                    warn!("link: detach not confirmed err={:?}", err);
                }
            }
            Err(err) => warn!("link: detach failed err={:?}", err),
        }
    }

    if let Err(err) = modem.deinit().await {
        warn!("link: deinit failed err={:?}", err);
    }
    info!("link: closed");
}
