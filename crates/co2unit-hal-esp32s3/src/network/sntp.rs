//! One-shot SNTP query over UDP.

use chrono::NaiveDateTime;
use co2unit_core::{
    board::NetworkTime,
    sntp::{NTP_PORT, PACKET_LEN, SntpError, parse_reply, request_packet},
};
use embassy_net::{
    Stack,
    udp::{PacketMetadata, UdpSocket},
};
use embassy_time::{Duration as EmbassyDuration, WithTimeout};
use log::info;

use super::resolve;

const LOCAL_PORT: u16 = 50_123;
const REPLY_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SntpClientError {
    Dns,
    Socket,
    Timeout,
    Reply(SntpError),
}

pub struct SntpClient<'d> {
    stack: Stack<'d>,
    server: &'static str,
}

impl<'d> SntpClient<'d> {
    pub fn new(stack: Stack<'d>, server: &'static str) -> Self {
        Self { stack, server }
    }
}

impl NetworkTime for SntpClient<'_> {
    type Error = SntpClientError;

    async fn fetch(&mut self) -> Result<NaiveDateTime, Self::Error> {
        let addr = resolve(self.stack, self.server)
            .await
            .ok_or(SntpClientError::Dns)?;

        let mut rx_meta = [PacketMetadata::EMPTY; 1];
        let mut tx_meta = [PacketMetadata::EMPTY; 1];
        let mut rx_buffer = [0u8; 2 * PACKET_LEN];
        let mut tx_buffer = [0u8; 2 * PACKET_LEN];
        let mut socket = UdpSocket::new(
            self.stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        socket.bind(LOCAL_PORT).map_err(|_| SntpClientError::Socket)?;
        socket
            .send_to(&request_packet(), (addr, NTP_PORT))
            .await
            .map_err(|_| SntpClientError::Socket)?;

        let mut reply = [0u8; PACKET_LEN];
        let (len, _) = socket
            .recv_from(&mut reply)
            .with_timeout(EmbassyDuration::from_secs(REPLY_TIMEOUT_SECS))
            .await
            .map_err(|_| SntpClientError::Timeout)?
            .map_err(|_| SntpClientError::Socket)?;

        let time = parse_reply(&reply[..len]).map_err(SntpClientError::Reply)?;
        info!("sntp: server={} time={}", self.server, time);
        Ok(time)
    }
}
