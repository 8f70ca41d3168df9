use clap::Parser;
use crossbeam_channel::{unbounded, Sender};
use dotenv::dotenv;
use std::error::Error;
use std::fs;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flowwatch::config::Args;
use flowwatch::models::domain::PacketEvent;
use flowwatch::shutdown::{self, Shutdown};
use flowwatch::simulate::{self, SimulatedLookup};
use flowwatch::{server, DomainResolver, FlowError, LocalAddrs, SystemLookup, Tracker};

const SIMULATION_INTERVAL: Duration = Duration::from_secs(5);
const STOP_GRACE: Duration = Duration::from_secs(2);
const FALLBACK_SIMULATED_ADDR: [u8; 4] = [192, 168, 1, 100];

enum Source {
    Simulated(IpAddr),
    #[cfg(feature = "capture")]
    Live(pcap::Device),
    #[cfg(feature = "capture")]
    File(std::path::PathBuf),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    let args = Args::parse();
    init_tracing(&args);
    args.validate()?;

    info!("Starting network traffic capture...");

    let (trigger, shutdown) = shutdown::channel();
    let trigger = Arc::new(trigger);
    {
        let trigger = Arc::clone(&trigger);
        ctrlc::set_handler(move || {
            info!("Stopping capture...");
            trigger.trigger();
        })?;
    }

    let mut local = LocalAddrs::discover();
    local.extend(args.local_addrs.iter().copied());
    let source = select_source(&args, &mut local)?;

    let tracker = Arc::new(build_tracker(&args, local));
    info!(
        "Local IPs: {:?}",
        tracker.local_addrs().iter().collect::<Vec<_>>()
    );
    let background = tracker.start(shutdown.clone());

    let (tx, rx) = unbounded();
    let source_thread = spawn_source(source, tx, shutdown.clone());

    let mut ingest = {
        let tracker = Arc::clone(&tracker);
        let shutdown = shutdown.clone();
        tokio::task::spawn_blocking(move || tracker.run_ingest(rx, shutdown))
    };

    if let Some(duration) = args.duration() {
        let trigger = Arc::clone(&trigger);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            info!("Capture duration of {:?} reached", duration);
            trigger.trigger();
        });
    }

    let mut ingest_done = false;
    let served = if args.serve {
        server::serve(Arc::clone(&tracker), args.listen_addr(), shutdown.clone()).await
    } else {
        let mut waiter = shutdown.clone();
        tokio::select! {
            _ = waiter.wait() => {}
            _ = &mut ingest => {
                info!("Packet source exhausted");
                ingest_done = true;
            }
        }
        Ok(())
    };
    if let Err(e) = &served {
        error!("Failed to start HTTP server: {}", e);
    }

    trigger.trigger();
    if !ingest_done && tokio::time::timeout(STOP_GRACE, ingest).await.is_err() {
        warn!("Ingest loop did not stop in time");
    }
    for handle in background {
        if tokio::time::timeout(STOP_GRACE, handle).await.is_err() {
            warn!("Background task did not stop in time");
        }
    }
    let joined = tokio::task::spawn_blocking(move || source_thread.join());
    if tokio::time::timeout(STOP_GRACE, joined).await.is_err() {
        warn!("Packet source did not stop in time");
    }

    write_output(&args, &tracker)?;
    served?;
    Ok(())
}

fn init_tracing(args: &Args) {
    let filter = if args.debug {
        EnvFilter::new(args.log_filter())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()))
    };
    // stdout is reserved for the JSON dump
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_tracker(args: &Args, local: LocalAddrs) -> Tracker {
    let settings = args.tracker_settings();
    if args.no_dns {
        return Tracker::new(local, settings);
    }

    let resolver = if args.simulate {
        DomainResolver::new(SimulatedLookup::default(), args.dns_timeout())
    } else {
        DomainResolver::new(SystemLookup, args.dns_timeout())
    };
    Tracker::with_resolver(local, settings, resolver)
}

fn select_source(args: &Args, local: &mut LocalAddrs) -> Result<Source, FlowError> {
    if args.simulate {
        let addr = local
            .iter()
            .copied()
            .find(|ip| !ip.is_loopback())
            .unwrap_or_else(|| IpAddr::from(FALLBACK_SIMULATED_ADDR));
        local.insert(addr);
        return Ok(Source::Simulated(addr));
    }

    capture_source(args, local)
}

#[cfg(feature = "capture")]
fn capture_source(args: &Args, local: &mut LocalAddrs) -> Result<Source, FlowError> {
    match flowwatch::sniff::all_device_addrs() {
        Ok(addrs) => local.extend(addrs),
        Err(e) => warn!("Could not list interface addresses: {}", e),
    }
    if let Some(path) = &args.pcap_file {
        return Ok(Source::File(path.clone()));
    }
    let device = flowwatch::sniff::find_device(args.interface.as_deref())?;
    local.extend(flowwatch::sniff::device_addrs(&device));
    Ok(Source::Live(device))
}

#[cfg(not(feature = "capture"))]
fn capture_source(_args: &Args, _local: &mut LocalAddrs) -> Result<Source, FlowError> {
    Err(FlowError::NoPacketSource(
        "built without the `capture` feature; rebuild with --features capture or run with --simulate".into(),
    ))
}

fn spawn_source(source: Source, tx: Sender<PacketEvent>, shutdown: Shutdown) -> JoinHandle<()> {
    match source {
        Source::Simulated(addr) => simulate::spawn(tx, addr, SIMULATION_INTERVAL, shutdown),
        #[cfg(feature = "capture")]
        Source::Live(device) => std::thread::spawn(move || {
            if let Err(e) = flowwatch::sniff::start_sniffing(device, tx, shutdown) {
                error!("Packet capture error: {}", e);
            }
        }),
        #[cfg(feature = "capture")]
        Source::File(path) => std::thread::spawn(move || {
            if let Err(e) = flowwatch::sniff::read_pcap_file(&path, tx, shutdown) {
                error!("Capture file error: {}", e);
            }
        }),
    }
}

fn write_output(args: &Args, tracker: &Tracker) -> Result<(), FlowError> {
    let snapshot = tracker.export_snapshot();
    let json = serde_json::to_string_pretty(&snapshot)?;

    match &args.output {
        Some(path) => {
            fs::write(path, json)?;
            info!(
                "Saved {} connections to {}",
                snapshot.connections.len(),
                path.display()
            );
        }
        None if !args.serve => println!("{}", json),
        None => {}
    }
    Ok(())
}
