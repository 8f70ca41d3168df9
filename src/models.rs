pub mod domain {
    use chrono::{DateTime, Utc};
    use std::fmt;
    use std::net::IpAddr;

    pub const IPPROTO_ICMP: u8 = 1;
    pub const IPPROTO_TCP: u8 = 6;
    pub const IPPROTO_UDP: u8 = 17;
    pub const IPPROTO_ICMPV6: u8 = 58;

    /// Transport protocols the tracker keeps flows for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Protocol {
        Tcp,
        Udp,
        Icmp,
    }

    impl Protocol {
        pub fn as_str(&self) -> &'static str {
            match self {
                Protocol::Tcp => "TCP",
                Protocol::Udp => "UDP",
                Protocol::Icmp => "ICMP",
            }
        }
    }

    impl fmt::Display for Protocol {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Network-layer view of a captured packet.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct IpLayer {
        pub src: IpAddr,
        pub dst: IpAddr,
        /// IP protocol number (IPv4 protocol / IPv6 next header)
        pub protocol: u8,
        /// (source, destination) ports when a TCP/UDP header was parsed
        pub ports: Option<(u16, u16)>,
    }

    /// One packet as handed over by a packet source.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct PacketEvent {
        pub timestamp: DateTime<Utc>,
        pub length: usize,
        pub ip: Option<IpLayer>,
    }

    impl PacketEvent {
        pub fn new(length: usize, ip: Option<IpLayer>) -> Self {
            PacketEvent {
                timestamp: Utc::now(),
                length,
                ip,
            }
        }

        pub fn tcp(src: IpAddr, src_port: u16, dst: IpAddr, dst_port: u16, length: usize) -> Self {
            Self::new(
                length,
                Some(IpLayer {
                    src,
                    dst,
                    protocol: IPPROTO_TCP,
                    ports: Some((src_port, dst_port)),
                }),
            )
        }

        pub fn udp(src: IpAddr, src_port: u16, dst: IpAddr, dst_port: u16, length: usize) -> Self {
            Self::new(
                length,
                Some(IpLayer {
                    src,
                    dst,
                    protocol: IPPROTO_UDP,
                    ports: Some((src_port, dst_port)),
                }),
            )
        }

        pub fn icmp(src: IpAddr, dst: IpAddr, length: usize) -> Self {
            Self::new(
                length,
                Some(IpLayer {
                    src,
                    dst,
                    protocol: IPPROTO_ICMP,
                    ports: None,
                }),
            )
        }
    }

    /// Direction-independent flow identity. The local endpoint is always first.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FlowKey {
        pub local_ip: IpAddr,
        pub remote_ip: IpAddr,
        pub local_port: u16,
        pub remote_port: u16,
        pub protocol: Protocol,
    }

    impl fmt::Display for FlowKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}:{} <-> {}:{} ({})",
                self.local_ip, self.local_port, self.remote_ip, self.remote_port, self.protocol
            )
        }
    }

    /// A tracked bidirectional conversation.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Flow {
        pub id: u64,
        pub key: FlowKey,
        pub service: &'static str,
        pub bytes_sent: u64,
        pub bytes_received: u64,
        pub packets_sent: u64,
        pub packets_received: u64,
        pub first_seen: DateTime<Utc>,
        pub last_seen: DateTime<Utc>,
        pub domain: String,
        pub active: bool,
    }

    impl Flow {
        pub fn new(id: u64, key: FlowKey, service: &'static str, at: DateTime<Utc>) -> Self {
            Flow {
                id,
                key,
                service,
                bytes_sent: 0,
                bytes_received: 0,
                packets_sent: 0,
                packets_received: 0,
                first_seen: at,
                last_seen: at,
                domain: String::new(),
                active: true,
            }
        }

        pub fn record(&mut self, is_outgoing: bool, bytes: u64, at: DateTime<Utc>) {
            if is_outgoing {
                self.bytes_sent += bytes;
                self.packets_sent += 1;
            } else {
                self.bytes_received += bytes;
                self.packets_received += 1;
            }
            // Out-of-order arrivals must not move last_seen backwards.
            if at > self.last_seen {
                self.last_seen = at;
            }
        }

        pub fn total_bytes(&self) -> u64 {
            self.bytes_sent + self.bytes_received
        }

        pub fn total_packets(&self) -> u64 {
            self.packets_sent + self.packets_received
        }
    }
}

pub mod dto {
    use chrono::{DateTime, Utc};
    use serde::Serialize;

    use super::domain::Flow;

    pub const UNKNOWN: &str = "Unknown";

    #[derive(Debug, Serialize, Clone, PartialEq, Eq)]
    #[serde(rename_all = "camelCase")]
    pub struct ConnectionDTO {
        pub id: u64,
        pub src_addr: String,
        pub src_port: u16,
        pub dst_addr: String,
        pub dst_port: u16,
        pub protocol: &'static str,
        pub service: String,
        pub bytes: u64,
        pub packets: u64,
        pub domain: String,
        pub country: String,
        pub asn: String,
        pub first_seen: DateTime<Utc>,
        pub last_seen: DateTime<Utc>,
        pub active: bool,
    }

    impl From<&Flow> for ConnectionDTO {
        fn from(flow: &Flow) -> Self {
            ConnectionDTO {
                id: flow.id,
                src_addr: flow.key.local_ip.to_string(),
                src_port: flow.key.local_port,
                dst_addr: flow.key.remote_ip.to_string(),
                dst_port: flow.key.remote_port,
                protocol: flow.key.protocol.as_str(),
                service: flow.service.to_string(),
                bytes: flow.total_bytes(),
                packets: flow.total_packets(),
                domain: flow.domain.clone(),
                country: UNKNOWN.to_string(),
                asn: UNKNOWN.to_string(),
                first_seen: flow.first_seen,
                last_seen: flow.last_seen,
                active: flow.active,
            }
        }
    }

    #[derive(Debug, Serialize, Clone, PartialEq, Eq)]
    pub struct DiagnosticsDTO {
        pub total_packets: u64,
        pub tcp_packets: u64,
        pub udp_packets: u64,
        pub icmp_packets: u64,
        pub other_packets: u64,
        pub last_packet_time: Option<DateTime<Utc>>,
    }

    #[derive(Debug, Serialize, Clone, PartialEq, Eq)]
    pub struct SnapshotDTO {
        pub connections: Vec<ConnectionDTO>,
        pub diagnostics: DiagnosticsDTO,
    }

    #[derive(Debug, Serialize, Clone, PartialEq, Eq)]
    pub struct StatsDTO {
        pub connections: usize,
        pub packets: DiagnosticsDTO,
    }
}
