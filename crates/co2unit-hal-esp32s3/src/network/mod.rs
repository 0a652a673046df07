//! Wi-Fi link and the IP clients that run over it.

pub mod http;
pub mod sntp;
pub mod wifi_link;

use core::net::Ipv4Addr;

use embassy_net::{IpAddress, Stack, dns::DnsQueryType};
use log::warn;

/// Literal IPv4 addresses skip DNS.
pub(crate) async fn resolve(stack: Stack<'_>, host: &str) -> Option<IpAddress> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Some(IpAddress::Ipv4(ip));
    }
    match stack.dns_query(host, DnsQueryType::A).await {
        Ok(addrs) => addrs.first().copied(),
        Err(err) => {
            warn!("net: dns failed host={} err={:?}", host, err);
            None
        }
    }
}
