//! Wi-Fi station as the core's [`Modem`]: attach is association with the
//! access point, connect is the DHCP lease handled by the stack runner.

use co2unit_core::modem::{ATTACH_TIMEOUT_MS, Modem};
use embassy_net::Stack;
use embassy_time::{Duration as EmbassyDuration, WithTimeout};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiError};

#[derive(Debug)]
pub enum WifiLinkError {
    Radio(WifiError),
    Timeout,
}

pub struct WifiLink<'d> {
    controller: WifiController<'d>,
    stack: Stack<'d>,
}

impl<'d> WifiLink<'d> {
    pub fn new(
        mut controller: WifiController<'d>,
        stack: Stack<'d>,
        ssid: &str,
        password: &str,
    ) -> Result<Self, WifiLinkError> {
        let client_config = ClientConfig::default()
            .with_ssid(ssid.into())
            .with_password(password.into());
        controller
            .set_config(&ModeConfig::Client(client_config))
            .map_err(WifiLinkError::Radio)?;
        Ok(Self { controller, stack })
    }

    fn is_started(&self) -> bool {
        self.controller.is_started().unwrap_or(false)
    }
}

impl Modem for WifiLink<'_> {
    type Error = WifiLinkError;

    async fn attach(&mut self) -> Result<(), Self::Error> {
        if !self.is_started() {
            self.controller
                .start_async()
                .await
                .map_err(WifiLinkError::Radio)?;
        }
        self.controller
            .connect_async()
            .with_timeout(EmbassyDuration::from_millis(ATTACH_TIMEOUT_MS))
            .await
            .map_err(|_| WifiLinkError::Timeout)?
            .map_err(WifiLinkError::Radio)
    }

    fn is_attached(&mut self) -> bool {
        matches!(self.controller.is_connected(), Ok(true))
    }

    async fn connect(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.stack.is_link_up() && self.stack.config_v4().is_some()
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.controller
            .disconnect_async()
            .await
            .map_err(WifiLinkError::Radio)
    }

    async fn detach(&mut self) -> Result<(), Self::Error> {
        if !self.is_started() {
            return Ok(());
        }
        self.controller
            .stop_async()
            .await
            .map_err(WifiLinkError::Radio)
    }

    /// The radio powers down with the chip in deep sleep.
    async fn deinit(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
