//! HTTP/1.1 client over an `embassy-net` TCP socket, one connection per
//! request. No TLS.

use alloc::{vec, vec::Vec};

use co2unit_core::http::{
    HttpClient, HttpError, HttpResponse, MAX_RESPONSE_LEN, Method, Url, parse_response,
    request_head,
};
use embassy_net::{Stack, tcp::TcpSocket};
use embassy_time::{Duration as EmbassyDuration, WithTimeout};
use log::{debug, warn};

use super::resolve;

const SOCKET_BUFFER_LEN: usize = 4096;
const READ_CHUNK: usize = 512;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct NetHttpClient<'d> {
    stack: Stack<'d>,
    rx_buffer: Vec<u8>,
    tx_buffer: Vec<u8>,
    timeout: EmbassyDuration,
}

impl<'d> NetHttpClient<'d> {
    pub fn new(stack: Stack<'d>) -> Self {
        Self {
            stack,
            rx_buffer: vec![0; SOCKET_BUFFER_LEN],
            tx_buffer: vec![0; SOCKET_BUFFER_LEN],
            timeout: EmbassyDuration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

async fn write_all(socket: &mut TcpSocket<'_>, mut data: &[u8]) -> Result<(), HttpError> {
    while !data.is_empty() {
        let n = socket.write(data).await.map_err(|err| {
            warn!("http: write failed err={:?}", err);
            HttpError::Io
        })?;
        if n == 0 {
            return Err(HttpError::Io);
        }
        data = &data[n..];
    }
    Ok(())
}

async fn exchange(socket: &mut TcpSocket<'_>, head: &[u8], body: &[u8]) -> Result<Vec<u8>, HttpError> {
    write_all(socket, head).await?;
    write_all(socket, body).await?;
    socket.flush().await.map_err(|_| HttpError::Io)?;

    let mut raw = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = socket.read(&mut chunk).await.map_err(|err| {
            warn!("http: read failed err={:?}", err);
            HttpError::Io
        })?;
        if n == 0 {
            return Ok(raw);
        }
        if raw.len() + n > MAX_RESPONSE_LEN {
            return Err(HttpError::ResponseTooLarge);
        }
        raw.extend_from_slice(&chunk[..n]);
    }
}

impl HttpClient for NetHttpClient<'_> {
    async fn request(&mut self, method: Method, url: &str, body: &[u8]) -> Result<HttpResponse, HttpError> {
        let target = Url::parse(url)?;
        let addr = resolve(self.stack, target.host).await.ok_or(HttpError::Dns)?;

        let mut socket = TcpSocket::new(self.stack, &mut self.rx_buffer, &mut self.tx_buffer);
        socket.set_timeout(Some(self.timeout));
        socket.connect((addr, target.port)).await.map_err(|err| {
            warn!("http: connect failed host={} err={:?}", target.host, err);
            HttpError::Connect
        })?;

        let head = request_head(method, &target, body.len());
        let raw = exchange(&mut socket, head.as_bytes(), body)
            .with_timeout(self.timeout)
            .await
            .map_err(|_| HttpError::Timeout);
        match raw {
            Ok(Ok(_)) => socket.close(),
            _ => socket.abort(),
        }
        let raw = raw??;

        let response = parse_response(&raw)?;
        debug!(
            "http: {} {} status={} body_len={}",
            method.as_str(),
            target.path,
            response.status,
            response.body.len()
        );
        Ok(response)
    }
}
