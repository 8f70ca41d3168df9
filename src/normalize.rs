use std::collections::HashSet;
use std::net::{IpAddr, UdpSocket};

use crate::models::domain::{FlowKey, Protocol};

/// Addresses owned by this host. A packet whose source is in the set is outgoing.
#[derive(Debug, Clone, Default)]
pub struct LocalAddrs {
    addrs: HashSet<IpAddr>,
}

impl LocalAddrs {
    pub fn new<I: IntoIterator<Item = IpAddr>>(addrs: I) -> Self {
        LocalAddrs {
            addrs: addrs.into_iter().collect(),
        }
    }

    /// Best guess at the host's addresses: loopback plus whatever the IPv4
    /// and IPv6 default routes bind to. Capture builds add every interface
    /// address on top of this.
    pub fn discover() -> Self {
        let mut addrs = LocalAddrs::new([
            IpAddr::from([127, 0, 0, 1]),
            IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 1]),
        ]);
        let routed = default_route_addrs();
        if routed.is_empty() {
            tracing::warn!("Could not determine local IP, only loopback is local");
        }
        for ip in routed {
            tracing::debug!("Default route address: {}", ip);
            addrs.insert(ip);
        }
        addrs
    }

    pub fn insert(&mut self, addr: IpAddr) -> bool {
        self.addrs.insert(addr)
    }

    pub fn extend<I: IntoIterator<Item = IpAddr>>(&mut self, addrs: I) {
        self.addrs.extend(addrs);
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.addrs.contains(addr)
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpAddr> {
        self.addrs.iter()
    }
}

const ROUTE_PROBES: [(&str, &str); 2] = [
    ("0.0.0.0:0", "8.8.8.8:80"),
    ("[::]:0", "[2001:4860:4860::8888]:80"),
];

fn default_route_addrs() -> Vec<IpAddr> {
    ROUTE_PROBES
        .iter()
        .filter_map(|(bind, target)| route_addr(bind, target))
        .filter(|ip| !ip.is_unspecified())
        .collect()
}

fn route_addr(bind: &str, target: &str) -> Option<IpAddr> {
    // No packet is sent; connect() on UDP only picks a route.
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(target).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// Canonical key for a packet plus whether it travelled outwards.
///
/// The local endpoint always lands in the first position, so both legs of a
/// conversation produce the same key.
pub fn canonicalize(
    src: IpAddr,
    dst: IpAddr,
    src_port: u16,
    dst_port: u16,
    protocol: Protocol,
    local: &LocalAddrs,
) -> (FlowKey, bool) {
    let (src_port, dst_port) = match protocol {
        Protocol::Icmp => (0, 0),
        _ => (src_port, dst_port),
    };

    let is_outgoing = local.contains(&src);
    let key = if is_outgoing {
        FlowKey {
            local_ip: src,
            remote_ip: dst,
            local_port: src_port,
            remote_port: dst_port,
            protocol,
        }
    } else {
        FlowKey {
            local_ip: dst,
            remote_ip: src,
            local_port: dst_port,
            remote_port: src_port,
            protocol,
        }
    };

    (key, is_outgoing)
}
