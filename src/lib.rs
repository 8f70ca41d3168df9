//! flowwatch
//!
//! Live network flow tracking: packets are classified, folded into
//! direction-independent flows, named through cached reverse DNS and aged out
//! after a period of inactivity. A JSON snapshot of the table is available at
//! any time through [`Tracker::export_snapshot`].

pub mod classify;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod evictor;
pub mod export;
pub mod models;
pub mod normalize;
pub mod parser;
pub mod resolver;
pub mod server;
pub mod shutdown;
pub mod simulate;
#[cfg(feature = "capture")]
pub mod sniff;
pub mod table;
pub mod tracker;

pub use error::{FlowError, Result};
pub use models::domain::{Flow, FlowKey, PacketEvent, Protocol};
pub use models::dto::SnapshotDTO;
pub use normalize::LocalAddrs;
pub use resolver::{DomainResolver, ReverseLookup, SystemLookup};
pub use table::FlowTable;
pub use tracker::{Tracker, TrackerSettings};
