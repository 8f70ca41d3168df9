// Frame decoding: raw link-layer bytes -> PacketEvent.
// Anything that does not slice cleanly down to the network layer comes out
// with `ip: None` and is tallied as "other" by the tracker.

use chrono::{DateTime, Utc};
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use std::net::IpAddr;

use crate::models::domain::{IpLayer, PacketEvent};

/// Decode an Ethernet II frame.
pub fn parse_frame(data: &[u8], timestamp: DateTime<Utc>) -> PacketEvent {
    let ip = SlicedPacket::from_ethernet(data)
        .ok()
        .and_then(|sliced| ip_layer(&sliced));

    PacketEvent {
        timestamp,
        length: data.len(),
        ip,
    }
}

/// Decode a packet that starts directly at the IP header (raw/tun links).
pub fn parse_ip(data: &[u8], timestamp: DateTime<Utc>) -> PacketEvent {
    let ip = SlicedPacket::from_ip(data)
        .ok()
        .and_then(|sliced| ip_layer(&sliced));

    PacketEvent {
        timestamp,
        length: data.len(),
        ip,
    }
}

fn ip_layer(sliced: &SlicedPacket<'_>) -> Option<IpLayer> {
    let (src, dst, protocol) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            (
                IpAddr::V4(header.source_addr()),
                IpAddr::V4(header.destination_addr()),
                ipv4.payload().ip_number.0,
            )
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            (
                IpAddr::V6(header.source_addr()),
                IpAddr::V6(header.destination_addr()),
                ipv6.payload().ip_number.0,
            )
        }
        _ => return None,
    };

    let ports = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => Some((tcp.source_port(), tcp.destination_port())),
        Some(TransportSlice::Udp(udp)) => Some((udp.source_port(), udp.destination_port())),
        _ => None,
    };

    Some(IpLayer {
        src,
        dst,
        protocol,
        ports,
    })
}
