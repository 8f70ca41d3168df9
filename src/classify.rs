use crate::models::domain::{
    PacketEvent, Protocol, IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP,
};

pub const UNKNOWN_SERVICE: &str = "Unknown";

/// Transport summary of a packet the tracker can keep a flow for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub protocol: Protocol,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Returns `None` for anything that is not TCP, UDP or ICMP over IP.
pub fn classify(event: &PacketEvent) -> Option<Classified> {
    let ip = event.ip.as_ref()?;

    match ip.protocol {
        IPPROTO_TCP | IPPROTO_UDP => {
            // A TCP/UDP packet without a parsed header (non-first fragment,
            // truncated capture) cannot be keyed.
            let (src_port, dst_port) = ip.ports?;
            let protocol = if ip.protocol == IPPROTO_TCP {
                Protocol::Tcp
            } else {
                Protocol::Udp
            };
            Some(Classified {
                protocol,
                src_port,
                dst_port,
            })
        }
        IPPROTO_ICMP | IPPROTO_ICMPV6 => Some(Classified {
            protocol: Protocol::Icmp,
            src_port: 0,
            dst_port: 0,
        }),
        _ => None,
    }
}

fn well_known(port: u16) -> Option<&'static str> {
    let label = match port {
        80 => "HTTP",
        443 => "HTTPS",
        53 => "DNS",
        22 => "SSH",
        21 => "FTP",
        25 => "SMTP",
        110 => "POP3",
        143 => "IMAP",
        3306 => "MySQL",
        5432 => "PostgreSQL",
        27017 => "MongoDB",
        6379 => "Redis",
        8080 => "HTTP-ALT",
        8443 => "HTTPS-ALT",
        _ => return None,
    };
    Some(label)
}

/// Service label for a flow. Destination port wins over source port.
pub fn service_label(protocol: Protocol, dst_port: u16, src_port: u16) -> &'static str {
    if protocol == Protocol::Icmp {
        return "ICMP";
    }

    well_known(dst_port)
        .or_else(|| well_known(src_port))
        .unwrap_or(UNKNOWN_SERVICE)
}
