use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FlowError, Result};
use crate::resolver::DEFAULT_LOOKUP_TIMEOUT;
use crate::tracker::TrackerSettings;

/// Capture and analyze network traffic.
///
/// Every option can also be set through a `FLOWWATCH_*` environment variable
/// (a `.env` file in the working directory is honoured).
#[derive(Parser, Debug, Clone)]
#[command(name = "flowwatch", version, about = "Capture and analyze network traffic")]
pub struct Args {
    /// Network interface to capture
    #[arg(short, long, env = "FLOWWATCH_INTERFACE")]
    pub interface: Option<String>,

    /// Replay a pcap file instead of capturing live
    #[arg(long, env = "FLOWWATCH_PCAP_FILE", conflicts_with = "simulate")]
    pub pcap_file: Option<PathBuf>,

    /// Output file for connections (written on exit)
    #[arg(short, long, env = "FLOWWATCH_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Capture duration in seconds
    #[arg(short, long, env = "FLOWWATCH_TIME")]
    pub time: Option<u64>,

    /// Run HTTP server for realtime data
    #[arg(short, long, env = "FLOWWATCH_SERVE")]
    pub serve: bool,

    /// HTTP server port
    #[arg(short, long, default_value_t = 8000, env = "FLOWWATCH_PORT")]
    pub port: u16,

    /// Generate simulated traffic for testing
    #[arg(long, env = "FLOWWATCH_SIMULATE")]
    pub simulate: bool,

    /// Enable debug logging
    #[arg(long, env = "FLOWWATCH_DEBUG")]
    pub debug: bool,

    /// Seconds of inactivity before a flow is evicted
    #[arg(long, default_value_t = 3600, env = "FLOWWATCH_TTL_SECS")]
    pub ttl_secs: u64,

    /// Seconds between eviction sweeps
    #[arg(long, default_value_t = 300, env = "FLOWWATCH_SWEEP_SECS")]
    pub sweep_secs: u64,

    /// Reverse DNS timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_LOOKUP_TIMEOUT.as_millis() as u64, env = "FLOWWATCH_DNS_TIMEOUT_MS")]
    pub dns_timeout_ms: u64,

    /// Skip reverse DNS entirely
    #[arg(long, env = "FLOWWATCH_NO_DNS")]
    pub no_dns: bool,

    /// Extra address to treat as local (repeatable or comma separated)
    #[arg(long = "local-addr", env = "FLOWWATCH_LOCAL_ADDRS", value_delimiter = ',')]
    pub local_addrs: Vec<IpAddr>,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.ttl_secs == 0 {
            return Err(FlowError::InvalidConfig("ttl must be at least one second".into()));
        }
        if self.sweep_secs == 0 {
            return Err(FlowError::InvalidConfig(
                "sweep interval must be at least one second".into(),
            ));
        }
        if self.dns_timeout_ms == 0 && !self.no_dns {
            return Err(FlowError::InvalidConfig(
                "dns timeout must be positive (use --no-dns to disable lookups)".into(),
            ));
        }
        if self.time == Some(0) {
            return Err(FlowError::InvalidConfig("capture duration must be positive".into()));
        }
        Ok(())
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            ttl: Duration::from_secs(self.ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_secs),
        }
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.time.map(Duration::from_secs)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "info,flowwatch=debug"
        } else {
            "info"
        }
    }
}
