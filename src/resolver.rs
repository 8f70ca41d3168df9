//! Reverse DNS for flow endpoints.
//!
//! Every distinct address is looked up at most once for the lifetime of a
//! [`DomainResolver`]. Failures and timeouts are cached as the empty string.
//! Lookups run on tokio's blocking pool so packet ingestion never waits on
//! them. At most [`DEFAULT_MAX_IN_FLIGHT`] lookups occupy blocking threads at
//! once, and the timeout only starts when a lookup is actually running.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{oneshot, OnceCell, Semaphore};
use tracing::{debug, info, warn};

use crate::shutdown::Shutdown;
use crate::table::{FlowTable, ResolveRequest};

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// Blocking PTR lookup. `None` when the address has no name.
pub trait ReverseLookup: Send + Sync + 'static {
    fn lookup(&self, ip: IpAddr) -> Option<String>;
}

/// System resolver via `getnameinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLookup;

impl ReverseLookup for SystemLookup {
    fn lookup(&self, ip: IpAddr) -> Option<String> {
        match dns_lookup::lookup_addr(&ip) {
            Ok(name) => {
                let name = name.trim_end_matches('.');
                // getnameinfo hands back the numeric form when there is no PTR record
                if name.is_empty() || name.parse::<IpAddr>().is_ok() {
                    None
                } else {
                    Some(name.to_string())
                }
            }
            Err(e) => {
                debug!("Reverse lookup failed for {}: {}", ip, e);
                None
            }
        }
    }
}

pub struct DomainResolver {
    cache: DashMap<IpAddr, Arc<OnceCell<String>>>,
    lookup: Arc<dyn ReverseLookup>,
    timeout: Duration,
    // Held by the blocking closure, so a hung lookup keeps its permit.
    in_flight: Arc<Semaphore>,
    lookups: AtomicU64,
}

impl DomainResolver {
    pub fn new<L: ReverseLookup>(lookup: L, timeout: Duration) -> Self {
        DomainResolver {
            cache: DashMap::new(),
            lookup: Arc::new(lookup),
            timeout,
            in_flight: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
            lookups: AtomicU64::new(0),
        }
    }

    /// Cap on lookups occupying blocking threads at the same time.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.in_flight = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Cached name for `ip`, if a lookup has completed.
    pub fn cached(&self, ip: &IpAddr) -> Option<String> {
        self.cache.get(ip).and_then(|cell| cell.get().cloned())
    }

    /// Number of lookups actually issued.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Name for `ip`, or "" when it has none. Concurrent callers for the same
    /// address share a single lookup.
    pub async fn resolve(&self, ip: IpAddr) -> String {
        let cell = {
            let entry = self
                .cache
                .entry(ip)
                .or_insert_with(|| Arc::new(OnceCell::new()));
            Arc::clone(entry.value())
        };

        if let Some(name) = cell.get() {
            return name.clone();
        }
        cell.get_or_init(|| self.lookup_once(ip)).await.clone()
    }

    /// Name for a flow: the remote address, falling back to the local one.
    pub async fn resolve_flow(&self, remote: IpAddr, local: IpAddr) -> String {
        let name = self.resolve(remote).await;
        if !name.is_empty() || remote == local {
            return name;
        }
        self.resolve(local).await
    }

    async fn lookup_once(&self, ip: IpAddr) -> String {
        let permit = match Arc::clone(&self.in_flight).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return String::new(),
        };

        let lookup = Arc::clone(&self.lookup);
        let (started_tx, started_rx) = oneshot::channel();
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _ = started_tx.send(());
            lookup.lookup(ip)
        });

        // Time spent queued for a blocking thread does not count against the timeout.
        if started_rx.await.is_err() {
            warn!("Lookup task for {} was dropped before it ran", ip);
            return String::new();
        }
        self.lookups.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Some(name))) => {
                debug!("DNS resolved {} -> {}", ip, name);
                name
            }
            Ok(Ok(None)) => {
                debug!("No name for {}", ip);
                String::new()
            }
            Ok(Err(e)) => {
                warn!("Lookup task for {} failed: {}", ip, e);
                String::new()
            }
            Err(_) => {
                debug!("DNS lookup timeout ({:?}) for {}", self.timeout, ip);
                String::new()
            }
        }
    }

    /// Serve resolution requests from the flow table until shutdown.
    pub async fn run(
        self: Arc<Self>,
        table: Arc<FlowTable>,
        mut requests: UnboundedReceiver<ResolveRequest>,
        mut shutdown: Shutdown,
    ) {
        info!("Domain resolver started");
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                request = requests.recv() => {
                    let Some(ResolveRequest { key }) = request else { break };
                    let resolver = Arc::clone(&self);
                    let table = Arc::clone(&table);
                    tokio::spawn(async move {
                        let domain = resolver.resolve_flow(key.remote_ip, key.local_ip).await;
                        if !domain.is_empty() {
                            table.set_domain(&key, domain);
                        }
                    });
                }
            }
        }
        info!("Domain resolver stopped ({} names cached)", self.cache_size());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::domain::{FlowKey, Protocol};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Fake resolver with a fixed table of names that counts every call.
    #[derive(Clone, Default)]
    pub(crate) struct CountingLookup {
        pub names: Arc<HashMap<IpAddr, String>>,
        pub calls: Arc<Mutex<HashMap<IpAddr, usize>>>,
        pub delay: Option<Duration>,
    }

    impl CountingLookup {
        pub fn with_names(names: &[(&str, &str)]) -> Self {
            CountingLookup {
                names: Arc::new(
                    names
                        .iter()
                        .map(|(ip, name)| (ip.parse().unwrap(), name.to_string()))
                        .collect(),
                ),
                ..Default::default()
            }
        }

        pub fn calls_for(&self, ip: &str) -> usize {
            let ip: IpAddr = ip.parse().unwrap();
            self.calls.lock().get(&ip).copied().unwrap_or(0)
        }
    }

    impl ReverseLookup for CountingLookup {
        fn lookup(&self, ip: IpAddr) -> Option<String> {
            *self.calls.lock().entry(ip).or_insert(0) += 1;
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.names.get(&ip).cloned()
        }
    }

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_positive_cache() {
        let lookup = CountingLookup::with_names(&[("93.184.216.34", "example.org")]);
        let resolver = DomainResolver::new(lookup.clone(), Duration::from_secs(1));

        assert_eq!(resolver.resolve(addr("93.184.216.34")).await, "example.org");
        assert_eq!(resolver.resolve(addr("93.184.216.34")).await, "example.org");
        assert_eq!(resolver.cached(&addr("93.184.216.34")).as_deref(), Some("example.org"));
        assert_eq!(lookup.calls_for("93.184.216.34"), 1);
    }

    #[tokio::test]
    async fn test_negative_cache() {
        let lookup = CountingLookup::default();
        let resolver = DomainResolver::new(lookup.clone(), Duration::from_secs(1));

        assert_eq!(resolver.resolve(addr("203.0.113.9")).await, "");
        assert_eq!(resolver.resolve(addr("203.0.113.9")).await, "");
        assert_eq!(resolver.cached(&addr("203.0.113.9")).as_deref(), Some(""));
        assert_eq!(lookup.calls_for("203.0.113.9"), 1);
        assert_eq!(resolver.lookups(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_local_address() {
        let lookup = CountingLookup::with_names(&[("10.0.0.5", "workstation.lan")]);
        let resolver = DomainResolver::new(lookup.clone(), Duration::from_secs(1));

        let name = resolver
            .resolve_flow(addr("203.0.113.9"), addr("10.0.0.5"))
            .await;
        assert_eq!(name, "workstation.lan");

        // Second flow to the same unresolvable remote: nothing new is looked up
        resolver
            .resolve_flow(addr("203.0.113.9"), addr("10.0.0.5"))
            .await;
        assert_eq!(lookup.calls_for("203.0.113.9"), 1);
        assert_eq!(lookup.calls_for("10.0.0.5"), 1);
    }

    #[tokio::test]
    async fn test_remote_name_skips_fallback() {
        let lookup = CountingLookup::with_names(&[("93.184.216.34", "example.org")]);
        let resolver = DomainResolver::new(lookup.clone(), Duration::from_secs(1));

        let name = resolver
            .resolve_flow(addr("93.184.216.34"), addr("10.0.0.5"))
            .await;
        assert_eq!(name, "example.org");
        assert_eq!(lookup.calls_for("10.0.0.5"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolves_share_one_lookup() {
        let lookup = CountingLookup {
            delay: Some(Duration::from_millis(50)),
            ..CountingLookup::with_names(&[("93.184.216.34", "example.org")])
        };
        let resolver = Arc::new(DomainResolver::new(lookup.clone(), Duration::from_secs(2)));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move { resolver.resolve(addr("93.184.216.34")).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "example.org");
        }
        assert_eq!(lookup.calls_for("93.184.216.34"), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_cached_as_failure() {
        let lookup = CountingLookup {
            delay: Some(Duration::from_millis(300)),
            ..CountingLookup::with_names(&[("93.184.216.34", "example.org")])
        };
        let resolver = DomainResolver::new(lookup.clone(), Duration::from_millis(20));

        let started = std::time::Instant::now();
        assert_eq!(resolver.resolve(addr("93.184.216.34")).await, "");
        assert!(started.elapsed() < Duration::from_millis(250));

        assert_eq!(resolver.resolve(addr("93.184.216.34")).await, "");
        assert_eq!(resolver.lookups(), 1);
    }

    #[test]
    fn test_timeout_starts_when_lookup_runs() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .max_blocking_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let lookup = CountingLookup {
            delay: Some(Duration::from_millis(400)),
            ..CountingLookup::default()
        };
        let resolver = Arc::new(DomainResolver::new(lookup.clone(), Duration::from_millis(200)));

        runtime.block_on(async {
            let first = {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move { resolver.resolve(addr("1.1.1.1")).await })
            };
            tokio::time::sleep(Duration::from_millis(10)).await;
            let second = resolver.resolve(addr("8.8.8.8")).await;

            assert_eq!(second, "");
            // Negatively cached only after the lookup really ran
            assert_eq!(lookup.calls_for("8.8.8.8"), 1);
            assert_eq!(first.await.unwrap(), "");
            assert_eq!(lookup.calls_for("1.1.1.1"), 1);
        });
        assert_eq!(resolver.lookups(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_lookups_are_capped() {
        let lookup = CountingLookup {
            delay: Some(Duration::from_millis(150)),
            ..CountingLookup::with_names(&[("192.0.2.1", "a.example"), ("192.0.2.2", "b.example")])
        };
        let resolver = Arc::new(
            DomainResolver::new(lookup.clone(), Duration::from_millis(20)).with_max_in_flight(1),
        );

        let started = std::time::Instant::now();
        let first = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve(addr("192.0.2.1")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(resolver.resolve(addr("192.0.2.2")).await, "");
        assert_eq!(first.await.unwrap(), "");

        // The second lookup waited for the first, timed out, and still ran once
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(lookup.calls_for("192.0.2.1"), 1);
        assert_eq!(lookup.calls_for("192.0.2.2"), 1);
    }

    #[tokio::test]
    async fn test_worker_names_new_flows() {
        let lookup = CountingLookup::with_names(&[("93.184.216.34", "example.org")]);
        let resolver = Arc::new(DomainResolver::new(lookup.clone(), Duration::from_secs(1)));
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let table = Arc::new(FlowTable::with_resolver(tx));
        let (trigger, shutdown) = crate::shutdown::channel();

        let worker = tokio::spawn(Arc::clone(&resolver).run(Arc::clone(&table), rx, shutdown));

        let key = FlowKey {
            local_ip: addr("10.0.0.5"),
            remote_ip: addr("93.184.216.34"),
            local_port: 51000,
            remote_port: 443,
            protocol: Protocol::Tcp,
        };
        table.update(key, true, 100);

        let mut named = false;
        for _ in 0..100 {
            if table.get(&key).map(|f| f.domain) == Some("example.org".to_string()) {
                named = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(named);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("resolver stopped")
            .unwrap();
    }
}
