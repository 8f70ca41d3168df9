// Synthetic traffic for demos and tests. Events go through the same
// ingest path as captured packets.

use crossbeam_channel::Sender;
use std::collections::HashMap;
use std::net::IpAddr;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::models::domain::PacketEvent;
use crate::resolver::ReverseLookup;
use crate::shutdown::Shutdown;

const WEBSITES: [(&str, [u8; 4]); 5] = [
    ("google.com", [142, 250, 190, 78]),
    ("youtube.com", [142, 250, 190, 110]),
    ("facebook.com", [157, 240, 3, 35]),
    ("twitter.com", [104, 244, 42, 1]),
    ("github.com", [140, 82, 121, 4]),
];

const SERVICE_PORTS: [u16; 4] = [80, 443, 53, 22];

const CONVERSATIONS: usize = 10;

/// One round of simulated conversations from `local`. Conversation `i` moves
/// `10_000 * (i + 1)` bytes split evenly between the two directions.
pub fn generate(local: IpAddr) -> Vec<PacketEvent> {
    let mut events = Vec::new();

    for i in 0..CONVERSATIONS {
        let (_, remote) = WEBSITES[i % WEBSITES.len()];
        let remote = IpAddr::from(remote);
        let remote_port = SERVICE_PORTS[i % SERVICE_PORTS.len()];
        let local_port = 50000 + i as u16;
        let udp = i % 3 == 0;

        let total_bytes = 10_000 * (i + 1);
        let packets_each_way = (total_bytes / 1000 / 2).max(1);
        let size = total_bytes / 2 / packets_each_way;

        for _ in 0..packets_each_way {
            let (out, back) = if udp {
                (
                    PacketEvent::udp(local, local_port, remote, remote_port, size),
                    PacketEvent::udp(remote, remote_port, local, local_port, size),
                )
            } else {
                (
                    PacketEvent::tcp(local, local_port, remote, remote_port, size),
                    PacketEvent::tcp(remote, remote_port, local, local_port, size),
                )
            };
            events.push(out);
            events.push(back);
        }
    }
    events
}

/// Answers reverse lookups for the simulated remote hosts only.
#[derive(Debug, Clone)]
pub struct SimulatedLookup {
    names: HashMap<IpAddr, String>,
}

impl Default for SimulatedLookup {
    fn default() -> Self {
        SimulatedLookup {
            names: WEBSITES
                .iter()
                .map(|(name, ip)| (IpAddr::from(*ip), name.to_string()))
                .collect(),
        }
    }
}

impl ReverseLookup for SimulatedLookup {
    fn lookup(&self, ip: IpAddr) -> Option<String> {
        self.names.get(&ip).cloned()
    }
}

/// Feed a round of simulated traffic every `every` until shutdown.
pub fn spawn(
    sender: Sender<PacketEvent>,
    local: IpAddr,
    every: Duration,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    thread::spawn(move || {
        info!("Generating simulated traffic from {}", local);
        let mut rounds = 0u64;

        'outer: while !shutdown.is_triggered() {
            for event in generate(local) {
                if sender.send(event).is_err() {
                    break 'outer;
                }
            }
            rounds += 1;
            debug!("Simulated round {} sent", rounds);

            let next = Instant::now() + every;
            while Instant::now() < next {
                if shutdown.is_triggered() {
                    break 'outer;
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
        info!("Simulation stopped after {} rounds", rounds);
    })
}
