//! Concurrent flow store.
//!
//! Flows live in a [`DashMap`] keyed by the canonical [`FlowKey`]. Every
//! operation that touches a key (create, update, remove, conditional evict)
//! runs under that key's shard lock, so per key they are strictly ordered
//! while unrelated keys on other shards proceed in parallel.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::UnboundedSender;

use crate::classify::service_label;
use crate::models::domain::{Flow, FlowKey};

/// Asks the resolver to name the endpoints of a freshly created flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveRequest {
    pub key: FlowKey,
}

pub struct FlowTable {
    flows: DashMap<FlowKey, Flow>,
    next_id: AtomicU64,
    resolve_tx: Option<UnboundedSender<ResolveRequest>>,
}

impl FlowTable {
    /// Table without domain resolution.
    pub fn new() -> Self {
        FlowTable {
            flows: DashMap::new(),
            next_id: AtomicU64::new(1),
            resolve_tx: None,
        }
    }

    /// Table that hands every new flow to a resolver worker.
    pub fn with_resolver(resolve_tx: UnboundedSender<ResolveRequest>) -> Self {
        FlowTable {
            resolve_tx: Some(resolve_tx),
            ..Self::new()
        }
    }

    pub fn update(&self, key: FlowKey, is_outgoing: bool, bytes: u64) -> bool {
        self.update_at(key, is_outgoing, bytes, Utc::now())
    }

    /// Get-or-create the flow for `key` and count one packet against it.
    /// Returns true when this call created the flow.
    pub fn update_at(&self, key: FlowKey, is_outgoing: bool, bytes: u64, at: DateTime<Utc>) -> bool {
        let mut created = false;
        {
            let mut flow = self.flows.entry(key).or_insert_with(|| {
                created = true;
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let service = service_label(key.protocol, key.remote_port, key.local_port);
                Flow::new(id, key, service, at)
            });
            flow.record(is_outgoing, bytes, at);
        }

        // Shard lock is released; resolution never runs under it.
        if created {
            tracing::debug!("New flow {}", key);
            if let Some(tx) = &self.resolve_tx {
                if tx.send(ResolveRequest { key }).is_err() {
                    tracing::trace!("Resolver gone, {} stays unnamed", key);
                }
            }
        }
        created
    }

    pub fn get(&self, key: &FlowKey) -> Option<Flow> {
        self.flows.get(key).map(|flow| flow.value().clone())
    }

    /// Copies of every flow, most recently active first.
    pub fn snapshot(&self) -> Vec<Flow> {
        let mut flows: Vec<Flow> = self.flows.iter().map(|entry| entry.value().clone()).collect();
        flows.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(a.id.cmp(&b.id)));
        flows
    }

    pub fn keys(&self) -> Vec<FlowKey> {
        self.flows.iter().map(|entry| *entry.key()).collect()
    }

    pub fn remove(&self, key: &FlowKey) -> bool {
        self.flows.remove(key).is_some()
    }

    /// Remove `key` only if it has been idle longer than `ttl` at `now`.
    /// The idle check and the removal happen under one lock, so a concurrent
    /// update either lands before (and the flow survives) or after (and
    /// creates a fresh flow).
    pub fn remove_if_idle(&self, key: &FlowKey, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.flows
            .remove_if(key, |_, flow| now.signed_duration_since(flow.last_seen) > ttl)
            .is_some()
    }

    /// Attach a resolved name. No-op if the flow was evicted meanwhile.
    pub fn set_domain(&self, key: &FlowKey, domain: String) -> bool {
        match self.flows.get_mut(key) {
            Some(mut flow) => {
                flow.domain = domain;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

impl Default for FlowTable {
    fn default() -> Self {
        Self::new()
    }
}
