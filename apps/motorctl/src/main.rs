use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use can_transport::CanBus;
use motor_bus::sim::SimRig;
use motor_bus::{
    bus_for, probe, read_telemetry_with_protection, resolve_bus_type, DefaultBusFactory,
    DiscoveredMotor, LinkProvider, MotorBus, ProbeRequest, SystemLinks,
};
use motor_monitor::{MemoryCalibrationStore, MetricsHub, SessionConfig, TelemetrySession};
use motor_registry::{
    load_models_file, load_overrides_file, load_robot_file, load_robots_dir, Brand, ModelRegistry,
    MotorId, OverrideProvider,
};
use robot_verify::{DeviceInfo, MemoryRobotStore, ProbeDiscovery, RobotVerifier};

#[derive(Parser, Debug)]
#[command(
    name = "motorctl",
    version,
    about = "Motor bus toolkit: probe, scan, monitor, verify",
    disable_help_subcommand = true
)]
struct Cli {
    /// Use the simulated bench (/dev/ttyMOCK0 Feetech, /dev/ttyMOCK1 Dynamixel, mock0 Damiao)
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    mock: bool,

    /// Extra model table (YAML) added to the built-in one
    #[arg(long, global = true)]
    models: Option<PathBuf>,

    /// Protection overrides (YAML, keyed by brand/model[/variant])
    #[arg(long, global = true)]
    overrides: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Mock,
    Slcan,
    Socketcan,
}

#[derive(clap::Args, Debug)]
struct BusArgs {
    /// Brand or bus type (feetech, dynamixel, damiao, feetech_serial, ...)
    #[arg(long)]
    bus: String,
    /// Serial port or CAN interface
    #[arg(long)]
    interface: String,
    /// Baud or bit rate (bus default when omitted)
    #[arg(long)]
    rate: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List known motor models
    Models {
        #[arg(long)]
        brand: Option<Brand>,
    },
    /// List available CAN interfaces
    CanList {
        #[arg(long, value_enum, default_value_t = Backend::Mock)]
        backend: Backend,
    },
    /// List serial ports
    Ports,
    /// Find brand and rate of whatever is on an interface
    Probe {
        interface: String,
        /// Rate to try (repeatable); each brand's usual rates otherwise
        #[arg(long = "rate")]
        rates: Vec<u32>,
        /// Ids to scan: `1-10` or `1,2,5`
        #[arg(long)]
        ids: Option<String>,
        /// Robot definitions to match the result against
        #[arg(long)]
        robots: Option<PathBuf>,
    },
    /// Scan a bus and print identified motors
    Scan {
        #[command(flatten)]
        bus: BusArgs,
        /// Ids to scan: `1-10` or `1,2,5` (full range otherwise)
        #[arg(long)]
        ids: Option<String>,
    },
    /// Read one motor's telemetry with protection status
    Read {
        #[command(flatten)]
        bus: BusArgs,
        /// `5`, or `send:recv` on CAN (`0x01:0x11`)
        #[arg(long)]
        id: MotorId,
        /// Skip identification and read as this model
        #[arg(long)]
        model: Option<String>,
        #[arg(long, requires = "model")]
        variant: Option<String>,
    },
    /// Poll a bus and print session events as JSON lines
    Monitor {
        #[command(flatten)]
        bus: BusArgs,
        /// Ids to look for: `1-10` or `1,2,5` (full range otherwise)
        #[arg(long)]
        ids: Option<String>,
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_s: Option<u64>,
        /// Print Prometheus metrics on exit
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
    /// Check a robot definition against the connected hardware
    Verify {
        file: PathBuf,
        /// Adapter to probe, `IFACE` or `IFACE=SERIAL` (repeatable); all known ports otherwise
        #[arg(long = "device")]
        devices: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let env = Env::load(&cli)?;

    match cli.command {
        Commands::Models { brand } => list_models(&env, brand),
        Commands::CanList { backend } => can_list(backend),
        Commands::Ports => list_ports(&env),
        Commands::Probe {
            interface,
            rates,
            ids,
            robots,
        } => probe_interface(&env, interface, rates, ids.as_deref(), robots.as_deref()),
        Commands::Scan { bus, ids } => scan(&env, &bus, ids.as_deref()),
        Commands::Read {
            bus,
            id,
            model,
            variant,
        } => read(&env, &bus, id, model.as_deref(), variant.as_deref()),
        Commands::Monitor {
            bus,
            ids,
            interval_ms,
            duration_s,
            metrics,
        } => monitor(&env, &bus, ids.as_deref(), interval_ms, duration_s, metrics).await,
        Commands::Verify { file, devices } => verify(&env, &file, &devices).await,
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

struct Env {
    links: Arc<dyn LinkProvider>,
    rig: Option<Arc<SimRig>>,
    registry: Arc<ModelRegistry>,
    overrides: Option<Arc<dyn OverrideProvider>>,
}

impl Env {
    fn load(cli: &Cli) -> Result<Self> {
        let mut registry = ModelRegistry::builtin();
        if let Some(path) = &cli.models {
            let extra = load_models_file(path)?;
            let n = extra.len();
            registry
                .extend(extra)
                .with_context(|| format!("merging {}", path.display()))?;
            info!(models = n, path = %path.display(), "extra models loaded");
        }
        let overrides = match &cli.overrides {
            Some(path) => Some(Arc::new(load_overrides_file(path)?) as Arc<dyn OverrideProvider>),
            None => None,
        };
        let (links, rig): (Arc<dyn LinkProvider>, _) = if cli.mock {
            let rig = Arc::new(SimRig::demo());
            (rig.clone(), Some(rig))
        } else {
            (Arc::new(SystemLinks), None)
        };
        Ok(Self {
            links,
            rig,
            registry: Arc::new(registry),
            overrides,
        })
    }

    fn factory(&self) -> DefaultBusFactory {
        DefaultBusFactory::new(self.links.clone(), self.registry.clone())
    }

    fn rate(args: &BusArgs) -> Result<u32> {
        Ok(args
            .rate
            .unwrap_or(resolve_bus_type(&args.bus)?.default_rate()))
    }

    fn open_bus(&self, args: &BusArgs) -> Result<MotorBus> {
        let bus_type = resolve_bus_type(&args.bus)?;
        let rate = Self::rate(args)?;
        let mut bus = bus_for(
            bus_type,
            &args.interface,
            rate,
            self.links.clone(),
            self.registry.clone(),
        );
        bus.set_overrides(self.overrides.clone());
        bus.connect()
            .with_context(|| format!("opening {bus_type} on {} at {rate}", args.interface))?;
        Ok(bus)
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `1-10`, `1,2,5` or a mix (`1-3,7`).
fn parse_ids(spec: &str) -> Result<Vec<u16>> {
    let mut ids = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((a, b)) => {
                let (a, b): (u16, u16) = (a.trim().parse()?, b.trim().parse()?);
                if a > b {
                    bail!("bad id range {part}");
                }
                ids.extend(a..=b);
            }
            None => ids.push(part.parse()?),
        }
    }
    if ids.is_empty() {
        bail!("no ids in '{spec}'");
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// `IFACE` or `IFACE=SERIAL`.
fn parse_device(spec: &str) -> DeviceInfo {
    match spec.split_once('=') {
        Some((iface, serial)) => DeviceInfo {
            interface: iface.trim().to_string(),
            serial_number: Some(serial.trim().to_string()),
        },
        None => DeviceInfo {
            interface: spec.trim().to_string(),
            serial_number: None,
        },
    }
}

fn list_models(env: &Env, brand: Option<Brand>) -> Result<()> {
    for m in env.registry.all() {
        if brand.is_some_and(|b| b != m.brand) {
            continue;
        }
        let numbers: Vec<String> = m.model_numbers.iter().map(|n| format!("0x{n:04X}")).collect();
        println!("{}\t{}\t{}", m.brand, m.display_name(), numbers.join(","));
    }
    Ok(())
}

fn can_list(backend: Backend) -> Result<()> {
    let buses = match backend {
        Backend::Mock => can_transport::MockBus::list()?,
        #[cfg(feature = "slcan")]
        Backend::Slcan => can_transport::SlcanBus::list()?,
        #[cfg(all(feature = "socketcan", target_os = "linux"))]
        Backend::Socketcan => can_transport::SocketCanBus::list()?,
        #[allow(unreachable_patterns)]
        other => bail!("backend {other:?} not compiled in; rebuild with its feature"),
    };
    for bus in buses {
        println!("{}\t{}", bus.name, bus.driver);
    }
    Ok(())
}

fn known_interfaces(env: &Env) -> Result<Vec<String>> {
    match &env.rig {
        Some(rig) => Ok(rig.interfaces()),
        None => Ok(motor_bus::list_serial_ports()?),
    }
}

fn list_ports(env: &Env) -> Result<()> {
    for port in known_interfaces(env)? {
        println!("{port}");
    }
    Ok(())
}

fn probe_interface(
    env: &Env,
    interface: String,
    rates: Vec<u32>,
    ids: Option<&str>,
    robots: Option<&Path>,
) -> Result<()> {
    let mut request = ProbeRequest::new(interface);
    if !rates.is_empty() {
        request.rates = Some(rates);
    }
    request.ids = ids.map(parse_ids).transpose()?;
    let robots = match robots {
        Some(dir) => load_robots_dir(dir)?.robots.into_values().collect(),
        None => Vec::new(),
    };
    let outcome = probe(&request, &env.factory(), &robots);
    print_json(&outcome)
}

fn scan(env: &Env, args: &BusArgs, ids: Option<&str>) -> Result<()> {
    let mut bus = env.open_bus(args)?;
    let found = match ids.map(parse_ids).transpose()? {
        Some(ids) => bus.scan_ids(&ids),
        None => bus.scan_motors(None),
    };
    bus.disconnect()?;
    let motors: Vec<DiscoveredMotor> = found?
        .into_iter()
        .map(|(id, model)| DiscoveredMotor { id, model })
        .collect();
    print_json(&motors)
}

fn read(
    env: &Env,
    args: &BusArgs,
    id: MotorId,
    model: Option<&str>,
    variant: Option<&str>,
) -> Result<()> {
    let mut bus = env.open_bus(args)?;
    let telemetry = match model {
        Some(model) => {
            let brand = bus.brand();
            read_telemetry_with_protection(&mut bus, id, brand, model, variant, None)
                .with_context(|| format!("no telemetry from motor {id}"))
        }
        None => bus.read_telemetry(id).map_err(anyhow::Error::from),
    };
    bus.disconnect()?;
    print_json(&telemetry?)
}

async fn monitor(
    env: &Env,
    args: &BusArgs,
    ids: Option<&str>,
    interval_ms: u64,
    duration_s: Option<u64>,
    with_metrics: bool,
) -> Result<()> {
    let hub = MetricsHub::new().map_err(anyhow::Error::msg)?;
    let config = SessionConfig {
        poll_interval: Duration::from_millis(interval_ms),
        overrides: env.overrides.clone(),
        metrics: Some(hub.clone()),
        ..Default::default()
    };
    let session = TelemetrySession::new(
        args.interface.clone(),
        Arc::new(env.factory()),
        Arc::new(MemoryCalibrationStore::new()),
        config,
    );
    session
        .open_driver(&args.bus, &args.interface, Env::rate(args)?)
        .await?;
    let targets = session
        .discover_targets(ids.map(parse_ids).transpose()?)
        .await?;
    if targets.is_empty() {
        session.close_driver().await?;
        bail!("no motors found on {}", args.interface);
    }
    info!(motors = targets.len(), "monitoring");

    let mut events = session.subscribe();
    session.start().await?;
    let until = async {
        match duration_s {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            }
        }
    };
    tokio::pin!(until);
    loop {
        tokio::select! {
            _ = &mut until => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event output lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    session.stop().await?;
    if with_metrics {
        print!("{}", hub.encode_text());
    }
    Ok(())
}

async fn verify(env: &Env, file: &Path, devices: &[String]) -> Result<()> {
    let definition = load_robot_file(file)?;
    let devices: Vec<DeviceInfo> = if devices.is_empty() {
        known_interfaces(env)?
            .iter()
            .map(|iface| parse_device(iface))
            .collect()
    } else {
        devices.iter().map(|d| parse_device(d)).collect()
    };
    let discovery = ProbeDiscovery::new(Arc::new(env.factory()), devices);
    let verifier = RobotVerifier::new(Arc::new(MemoryRobotStore::new()), Arc::new(discovery));
    let verification = verifier.verify_robot(definition).await?;
    print_json(&verification)
}
