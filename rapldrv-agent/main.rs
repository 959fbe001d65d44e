use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use rapldrv::access::{RegisterAccess, SimulatedRegisters};
use rapldrv::common::{check_msr_device, MonotonicClock, MsrAccess, CPU_INFO};
use rapldrv::config::{parse_register, parse_register_list, DEVICE_NAME, DEFAULT_DEVICE_PATH};
use rapldrv::energy::{EnergyDomain, RaplMonitor};
use rapldrv::server::serve_metrics;
use rapldrv::{Client, Device, DispatchMetricExporter, Dispatcher, DriverConfig, Server};
use rapldrv_raw::rapl::{register_name, RaplPowerLimit, RaplPowerUnit};
use rapldrv_raw::register::decode_as;

#[derive(Parser, Debug)]
#[command(name = "rapldrv")]
#[command(about = "Privileged RAPL register service and client")]
struct Args {
    #[arg(
        long,
        global = true,
        default_value = DEFAULT_DEVICE_PATH,
        help = "Socket path the device is published under"
    )]
    device: PathBuf,

    #[arg(
        short,
        long,
        global = true,
        help = "Enable verbose logging (shows every request and MSR access)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish the device and serve requests until SIGINT/SIGTERM
    Serve {
        #[arg(long, default_value_t = 0, help = "Logical CPU whose MSRs are read")]
        cpu: u32,

        #[arg(
            long = "allow",
            help = "Restrict hardware reads to these registers (e.g. --allow 0x606,0x610-0x611 or --allow rapl)",
            action = clap::ArgAction::Append
        )]
        allow: Vec<String>,

        #[arg(long, help = "Route out-direct control codes through the function-code table")]
        direct_io: bool,

        #[arg(
            long,
            requires = "direct_io",
            help = "DEBUG ONLY: overwrite each directly read register with the current timestamp"
        )]
        write_back: bool,

        #[arg(long, help = "Serve a simulated RAPL package instead of /dev/cpu/*/msr")]
        simulate: bool,

        #[arg(long, help = "Serve Prometheus metrics on this address (e.g. 0.0.0.0:9100)")]
        metrics_addr: Option<SocketAddr>,
    },

    /// Read registers through the device
    Read {
        #[arg(required = true, help = "Register numbers, decimal or 0x-prefixed hex")]
        registers: Vec<String>,
    },

    /// Sample RAPL energy counters and report average power
    Energy {
        #[arg(
            long = "domain",
            default_value = "package",
            help = "Power domains to sample (package, core, uncore, dram, platform)",
            action = clap::ArgAction::Append
        )]
        domains: Vec<String>,

        #[arg(long, default_value_t = 1000, help = "Sampling interval in milliseconds")]
        interval_ms: u64,

        #[arg(long, default_value_t = 1, help = "Number of intervals to report")]
        samples: u32,
    },

    /// Check that the device answers its diagnostic registers
    Ping,
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    tracing::info!("Installing signal handlers...");

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Ctrl+C received!");
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("SIGTERM received!");
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Shutdown triggered by Ctrl+C");
        },
        _ = terminate => {
            tracing::warn!("Shutdown triggered by SIGTERM");
        },
    }

    tracing::warn!("Shutdown signal received, unloading device...");
    cancel_token.cancel();
}

#[allow(clippy::too_many_arguments)]
async fn serve(
    device_path: PathBuf,
    cpu: u32,
    allow: Vec<String>,
    direct_io: bool,
    write_back: bool,
    simulate: bool,
    metrics_addr: Option<SocketAddr>,
) -> anyhow::Result<()> {
    let allow_list = if allow.is_empty() {
        None
    } else {
        Some(parse_register_list(&allow).context("invalid --allow list")?)
    };

    let config = DriverConfig {
        device_path,
        cpu,
        allow_list,
        direct_io,
        write_back,
        simulate,
        metrics_addr,
    };
    config.validate()?;

    tracing::info!(
        "CPU: {} family {:X} model {:X} stepping {:X}",
        CPU_INFO.vendor,
        CPU_INFO.family,
        CPU_INFO.model,
        CPU_INFO.stepping
    );

    let access: Arc<dyn RegisterAccess> = if config.simulate {
        tracing::warn!("Serving a simulated RAPL package; no hardware is accessed");
        Arc::new(SimulatedRegisters::rapl_package())
    } else {
        if let Err(issue) = check_msr_device(config.cpu) {
            bail!("{issue}");
        }
        if !CPU_INFO.has_rapl() {
            tracing::warn!("This CPU does not advertise Intel RAPL; reads may fault");
        }
        Arc::new(MsrAccess::open(config.cpu)?)
    };

    match &config.allow_list {
        Some(allow) => tracing::info!("Hardware reads restricted to {} registers", allow.len()),
        None => tracing::warn!("No allow-list configured: any register number is forwarded"),
    }

    let dispatcher = Dispatcher::from_config(&config, access, Arc::new(MonotonicClock));
    let device = Arc::new(Device::create(DEVICE_NAME, &config.device_path, dispatcher));

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel_token.clone()));

    let mut server = Server::bind(Arc::clone(&device))?;
    let mut metrics_handle = None;
    if let Some(addr) = config.metrics_addr {
        let metrics = Arc::new(DispatchMetricExporter::new()?);
        server = server.with_metrics(Arc::clone(&metrics));
        metrics_handle = Some(tokio::spawn(serve_metrics(
            addr,
            metrics,
            cancel_token.clone(),
        )));
    }

    server.run(cancel_token).await?;

    if let Some(handle) = metrics_handle {
        if let Err(e) = handle.await? {
            tracing::error!("Metrics server failed: {}", e);
        }
    }

    tracing::info!("All tasks completed, exiting");
    Ok(())
}

async fn read(device_path: PathBuf, registers: Vec<String>) -> anyhow::Result<()> {
    let registers = registers
        .iter()
        .map(|r| parse_register(r))
        .collect::<rapldrv::Result<Vec<u32>>>()?;

    let mut client = Client::connect(&device_path).await?;
    for register in registers {
        let value = client.read_register(register).await?;
        let name = register_name(register).unwrap_or("");
        println!("0x{register:03X} {name:<28} 0x{value:016X}");

        if let Some(unit) = decode_as::<RaplPowerUnit>(register, value) {
            println!(
                "      power unit {} W, energy unit {} J, time unit {} s",
                unit.power_unit_multiplier(),
                unit.energy_unit_multiplier(),
                unit.time_unit_multiplier()
            );
        }
        if let Some(limit) = decode_as::<RaplPowerLimit>(register, value) {
            let unit: RaplPowerUnit = client.read_layout().await?;
            println!(
                "      PL1 {:.3} W (enabled: {}), PL2 {:.3} W (enabled: {}), locked: {}",
                limit.limit_1_watts(&unit),
                limit.enable_1,
                limit.limit_2_watts(&unit),
                limit.enable_2,
                limit.lock
            );
        }
    }
    Ok(())
}

async fn energy(
    device_path: PathBuf,
    domains: Vec<String>,
    interval_ms: u64,
    samples: u32,
) -> anyhow::Result<()> {
    let domains = domains
        .iter()
        .map(|name| {
            EnergyDomain::from_name(name).with_context(|| format!("unknown energy domain '{name}'"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut client = Client::connect(&device_path).await?;
    let mut monitor = RaplMonitor::new(&mut client, &domains).await?;

    let interval = Duration::from_millis(interval_ms);
    for _ in 0..samples {
        tokio::time::sleep(interval).await;
        for reading in monitor.get_power_consumption(&mut client).await? {
            println!(
                "{:<8} {:>12.6} J {:>10.3} W",
                reading.domain.name(),
                reading.joules,
                reading.watts()
            );
        }
    }
    Ok(())
}

async fn ping(device_path: PathBuf) -> anyhow::Result<()> {
    let mut client = Client::connect(&device_path).await?;
    if !client.ping().await? {
        bail!("device at {} answered with wrong sentinels", device_path.display());
    }
    println!("{} is alive", device_path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logging based on verbose flag
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(log_level).init();

    match args.command {
        Command::Serve {
            cpu,
            allow,
            direct_io,
            write_back,
            simulate,
            metrics_addr,
        } => {
            serve(
                args.device,
                cpu,
                allow,
                direct_io,
                write_back,
                simulate,
                metrics_addr,
            )
            .await
        }
        Command::Read { registers } => read(args.device, registers).await,
        Command::Energy {
            domains,
            interval_ms,
            samples,
        } => energy(args.device, domains, interval_ms, samples).await,
        Command::Ping => ping(args.device).await,
    }
}
