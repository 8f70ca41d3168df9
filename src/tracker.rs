//! Packet ingestion and the background tasks around the flow table.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::classify::classify;
use crate::diagnostics::Diagnostics;
use crate::evictor::{Evictor, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
use crate::export;
use crate::models::domain::{FlowKey, PacketEvent};
use crate::models::dto::{SnapshotDTO, StatsDTO};
use crate::normalize::{canonicalize, LocalAddrs};
use crate::resolver::DomainResolver;
use crate::shutdown::Shutdown;
use crate::table::{FlowTable, ResolveRequest};

const INGEST_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        TrackerSettings {
            ttl: DEFAULT_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

pub struct Tracker {
    table: Arc<FlowTable>,
    diagnostics: Arc<Diagnostics>,
    local: LocalAddrs,
    settings: TrackerSettings,
    resolver: Option<Arc<DomainResolver>>,
    resolve_rx: Mutex<Option<UnboundedReceiver<ResolveRequest>>>,
}

impl Tracker {
    /// Tracker that leaves every domain empty.
    pub fn new(local: LocalAddrs, settings: TrackerSettings) -> Self {
        Tracker {
            table: Arc::new(FlowTable::new()),
            diagnostics: Arc::new(Diagnostics::new()),
            local,
            settings,
            resolver: None,
            resolve_rx: Mutex::new(None),
        }
    }

    pub fn with_resolver(local: LocalAddrs, settings: TrackerSettings, resolver: DomainResolver) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Tracker {
            table: Arc::new(FlowTable::with_resolver(tx)),
            diagnostics: Arc::new(Diagnostics::new()),
            local,
            settings,
            resolver: Some(Arc::new(resolver)),
            resolve_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn table(&self) -> &Arc<FlowTable> {
        &self.table
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn local_addrs(&self) -> &LocalAddrs {
        &self.local
    }

    /// Count one packet and fold it into its flow. Returns the flow key, or
    /// `None` when the packet was unclassifiable and only tallied.
    pub fn ingest(&self, event: &PacketEvent) -> Option<FlowKey> {
        let now = chrono::Utc::now();

        let Some(classified) = classify(event) else {
            self.diagnostics.record(None, now);
            trace!("Dropped unclassifiable packet ({} bytes)", event.length);
            return None;
        };
        self.diagnostics.record(Some(classified.protocol), now);

        // classify() only succeeds when an IP layer is present
        let ip = event.ip.as_ref()?;
        let (key, is_outgoing) = canonicalize(
            ip.src,
            ip.dst,
            classified.src_port,
            classified.dst_port,
            classified.protocol,
            &self.local,
        );
        trace!(
            "{}: {}:{} -> {}:{} ({} bytes)",
            classified.protocol,
            ip.src,
            classified.src_port,
            ip.dst,
            classified.dst_port,
            event.length
        );

        self.table.update_at(key, is_outgoing, event.length as u64, now);
        Some(key)
    }

    pub fn export_snapshot(&self) -> SnapshotDTO {
        export::export_snapshot(&self.table, &self.diagnostics)
    }

    pub fn stats(&self) -> StatsDTO {
        export::stats(&self.table, &self.diagnostics)
    }

    pub fn evictor(&self) -> Evictor {
        Evictor::new(
            Arc::clone(&self.table),
            self.settings.ttl,
            self.settings.sweep_interval,
        )
    }

    /// Spawn the evictor and, if configured, the resolver worker on the
    /// current tokio runtime. The resolver worker can only be started once.
    pub fn start(&self, shutdown: Shutdown) -> Vec<JoinHandle<()>> {
        let mut handles = vec![tokio::spawn(self.evictor().run(shutdown.clone()))];

        if let (Some(resolver), Some(rx)) = (&self.resolver, self.resolve_rx.lock().take()) {
            handles.push(tokio::spawn(Arc::clone(resolver).run(
                Arc::clone(&self.table),
                rx,
                shutdown,
            )));
        }
        handles
    }

    /// Drain packet events until shutdown or until every sender is gone.
    /// Blocking; run it on a dedicated thread. Returns the number of events seen.
    pub fn run_ingest(&self, events: Receiver<PacketEvent>, shutdown: Shutdown) -> u64 {
        info!("Ingest loop started ({} local addresses)", self.local.len());
        let mut seen = 0u64;

        while !shutdown.is_triggered() {
            match events.recv_timeout(INGEST_POLL) {
                Ok(event) => {
                    self.ingest(&event);
                    seen += 1;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Packet source closed");
                    break;
                }
            }
        }

        info!("Ingest loop stopped after {} packets", seen);
        seen
    }
}
