use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::domain::Protocol;
use crate::models::dto::DiagnosticsDTO;

/// Process-wide packet counters. Only ever increase.
#[derive(Debug, Default)]
pub struct Diagnostics {
    total_packets: AtomicU64,
    tcp_packets: AtomicU64,
    udp_packets: AtomicU64,
    icmp_packets: AtomicU64,
    other_packets: AtomicU64,
    last_packet_time: Mutex<Option<DateTime<Utc>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a packet. `None` means it was dropped as unclassifiable.
    pub fn record(&self, protocol: Option<Protocol>, at: DateTime<Utc>) {
        self.total_packets.fetch_add(1, Ordering::Relaxed);
        let bucket = match protocol {
            Some(Protocol::Tcp) => &self.tcp_packets,
            Some(Protocol::Udp) => &self.udp_packets,
            Some(Protocol::Icmp) => &self.icmp_packets,
            None => &self.other_packets,
        };
        bucket.fetch_add(1, Ordering::Relaxed);

        let mut last = self.last_packet_time.lock();
        if last.map_or(true, |prev| at > prev) {
            *last = Some(at);
        }
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets.load(Ordering::Relaxed)
    }

    pub fn to_dto(&self) -> DiagnosticsDTO {
        DiagnosticsDTO {
            total_packets: self.total_packets(),
            tcp_packets: self.tcp_packets.load(Ordering::Relaxed),
            udp_packets: self.udp_packets.load(Ordering::Relaxed),
            icmp_packets: self.icmp_packets.load(Ordering::Relaxed),
            other_packets: self.other_packets.load(Ordering::Relaxed),
            last_packet_time: *self.last_packet_time.lock(),
        }
    }
}
