// src/sniff.rs
// libpcap packet source. Only built with the `capture` feature.

use chrono::{DateTime, TimeZone, Utc};
use crossbeam_channel::Sender;
use pcap::{Activated, Active, Capture, Device, Linktype};
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{FlowError, Result};
use crate::models::domain::PacketEvent;
use crate::parser::{parse_frame, parse_ip};
use crate::shutdown::Shutdown;

const LINKTYPE_ETHERNET: i32 = 1;
const LINKTYPE_RAW: i32 = 101;
const LINKTYPE_RAW_BSD: i32 = 12;
const LINKTYPE_IPV4: i32 = 228;
const LINKTYPE_IPV6: i32 = 229;

pub fn find_device(interface: Option<&str>) -> Result<Device> {
    match interface {
        Some(name) => Device::list()?
            .into_iter()
            .find(|device| device.name == name)
            .ok_or_else(|| FlowError::NoPacketSource(format!("no such interface: {}", name))),
        None => Device::lookup()?
            .ok_or_else(|| FlowError::NoPacketSource("no capture device found".into())),
    }
}

/// Addresses bound to the capture device; these count as local.
pub fn device_addrs(device: &Device) -> Vec<IpAddr> {
    device.addresses.iter().map(|address| address.addr).collect()
}

/// Every address of every interface libpcap can see.
pub fn all_device_addrs() -> Result<Vec<IpAddr>> {
    Ok(Device::list()?.iter().flat_map(device_addrs).collect())
}

pub fn start_sniffing(device: Device, sender: Sender<PacketEvent>, shutdown: Shutdown) -> Result<()> {
    info!("Starting packet capture on {}", device.name);
    let mut cap = create_capture(device)?;
    process_packets(&mut cap, sender, shutdown)
}

pub fn read_pcap_file(path: &Path, sender: Sender<PacketEvent>, shutdown: Shutdown) -> Result<()> {
    info!("Replaying capture file {}", path.display());
    let mut cap = Capture::from_file(path)?;
    process_packets(&mut cap, sender, shutdown)
}

fn create_capture(device: Device) -> Result<Capture<Active>> {
    let cap = Capture::from_device(device)?
        .promisc(true)
        .snaplen(65535) // the parser rejects truncated IP payloads
        .timeout(500) // wake up to check for shutdown
        .immediate_mode(true)
        .open()?;
    Ok(cap)
}

fn process_packets<T: Activated + ?Sized>(
    cap: &mut Capture<T>,
    sender: Sender<PacketEvent>,
    shutdown: Shutdown,
) -> Result<()> {
    let Linktype(linktype) = cap.get_datalink();
    debug!("Capture link type {}", linktype);

    while !shutdown.is_triggered() {
        let packet = match cap.next_packet() {
            Ok(packet) => packet,
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => return Err(e.into()),
        };

        let timestamp = packet_time(packet.header.ts.tv_sec as i64, packet.header.ts.tv_usec as i64);
        let mut event = match linktype {
            LINKTYPE_ETHERNET => parse_frame(packet.data, timestamp),
            LINKTYPE_RAW | LINKTYPE_RAW_BSD | LINKTYPE_IPV4 | LINKTYPE_IPV6 => parse_ip(packet.data, timestamp),
            other => {
                warn!("Unsupported link type {}, stopping capture", other);
                return Err(FlowError::NoPacketSource(format!("unsupported link type {}", other)));
            }
        };
        // wire length, not captured length
        event.length = packet.header.len as usize;

        if sender.send(event).is_err() {
            debug!("Ingest loop gone, stopping capture");
            break;
        }
    }

    info!("Packet capture stopped");
    Ok(())
}

fn packet_time(secs: i64, micros: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, (micros.clamp(0, 999_999) * 1000) as u32)
        .single()
        .unwrap_or_else(Utc::now)
}
