//! lc4 - command line front end for LC4 traffic-signal controllers

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lc4_core::demo::{self, DemoController};
use lc4_core::model::{day_type_label, load_snapshot, save_snapshot, ConfigurationSnapshot};
use lc4_core::monitor::Monitor;
use lc4_core::orchestrator::{Orchestrator, Progress};
use lc4_core::protocol::{list_ports, Client, Session, SessionConfig, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

#[derive(Parser)]
#[command(name = "lc4")]
#[command(version = lc4_core::VERSION)]
#[command(about = "Configure and monitor LC4 traffic-signal controllers")]
struct Cli {
    /// Serial port (e.g. /dev/ttyUSB0 or COM3)
    #[arg(short, long, global = true, env = "LC4_PORT")]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true, env = "LC4_BAUD", default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Response timeout in milliseconds
    #[arg(long, global = true, env = "LC4_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Talk to a simulated controller instead of a serial port
    #[arg(long, global = true)]
    demo: bool,

    /// More logging (-v info, -vv debug with wire dumps, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Show controller ID, clock and status
    Info,

    /// Set the controller ID
    SetId {
        /// New controller ID
        id: u8,
    },

    /// Set the controller clock to this computer's local time
    SyncClock,

    /// Read the whole configuration into a project file
    Capture {
        /// Output JSON file
        file: PathBuf,
    },

    /// Write a project file to the controller
    Upload {
        /// Input JSON file
        file: PathBuf,
    },

    /// Print live signal reports
    Monitor {
        /// Stop after this many reports
        #[arg(short, long)]
        count: Option<usize>,
    },

    /// Erase the controller configuration
    FactoryReset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_session(cli: &Cli) -> Result<Arc<Session>> {
    let config = SessionConfig {
        port_name: cli.port.clone().unwrap_or_default(),
        baud_rate: cli.baud,
        timeout_ms: cli.timeout_ms,
        ..SessionConfig::default()
    };
    let session = Arc::new(Session::new(config));

    if cli.demo {
        demo::attach(&session, DemoController::with_sample_config());
        return Ok(session);
    }
    if cli.port.is_none() {
        bail!("no serial port given; use --port, LC4_PORT or --demo");
    }
    session
        .connect_configured()
        .context("could not open controller port")?;
    Ok(session)
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return;
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  [{:04x}:{:04x}] {}",
                port.name,
                vid,
                pid,
                port.product.unwrap_or_default()
            ),
            _ => println!("{}", port.name),
        }
    }
}

fn print_info(client: &Client) -> Result<()> {
    let id = client.get_id().context("reading controller ID")?;
    let clock = client.get_clock().context("reading clock")?;
    let status = client.get_status().context("reading status")?;

    println!("Controller ID: {}", id);
    match clock.to_naive() {
        Some(dt) => println!("Clock:         {}", dt.format("%Y-%m-%d %H:%M:%S")),
        None => println!("Clock:         invalid ({:?})", clock),
    }
    let hex: Vec<String> = status.iter().map(|b| format!("{:02X}", b)).collect();
    println!("Status:        {}", hex.join(" "));
    Ok(())
}

fn print_summary(snapshot: &ConfigurationSnapshot) {
    println!(
        "{} movements, {} sequences, {} plans, {} intermittences, {} holidays, {} flow rules",
        snapshot.movements.len(),
        snapshot.sequences.len(),
        snapshot.plans.len(),
        snapshot.intermittences.len(),
        snapshot.holidays.len(),
        snapshot.flow_rules.len()
    );
    for plan in &snapshot.plans {
        let cycle = snapshot
            .plan_cycle_time(plan.id)
            .map(|s| format!("{}s cycle", s))
            .unwrap_or_else(|| "no sequence".to_string());
        println!(
            "  plan {:2}: {:02}:{:02} {:<20} sequence {} ({})",
            plan.id,
            plan.hour,
            plan.minute,
            day_type_label(plan.day_type_id),
            plan.sequence_id,
            cycle
        );
    }
}

fn progress_logger(progress: Progress) {
    if progress.index == 0 {
        tracing::info!(table = %progress.table, slots = progress.total, "transferring");
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Ports = cli.command {
        print_ports();
        return Ok(());
    }

    let session = open_session(&cli)?;
    let client = Client::new(Arc::clone(&session));

    match cli.command {
        Commands::Ports => {}
        Commands::Info => print_info(&client)?,
        Commands::SetId { id } => {
            client.set_id(id).context("setting controller ID")?;
            println!("Controller ID set to {}", id);
        }
        Commands::SyncClock => {
            let clock = client.sync_clock().context("setting clock")?;
            println!(
                "Clock set to {:02}:{:02}:{:02} {:02}/{:02}/{:02}",
                clock.hour, clock.minute, clock.second, clock.day, clock.month, clock.year
            );
        }
        Commands::Capture { file } => {
            let orchestrator = Orchestrator::new(client).on_progress(progress_logger);
            let snapshot = orchestrator.capture_all().context("capture failed")?;
            save_snapshot(&snapshot, &file)
                .with_context(|| format!("writing {}", file.display()))?;
            print_summary(&snapshot);
            println!("Saved to {}", file.display());
        }
        Commands::Upload { file } => {
            let snapshot =
                load_snapshot(&file).with_context(|| format!("reading {}", file.display()))?;
            print_summary(&snapshot);
            let orchestrator = Orchestrator::new(client).on_progress(progress_logger);
            let report = orchestrator.upload_all(&snapshot).context("upload failed")?;
            println!(
                "Uploaded: {} slots written, {} cleared",
                report.written, report.cleared
            );
        }
        Commands::Monitor { count } => {
            let monitor = Monitor::start(Arc::clone(&session), 64).context("enabling monitoring")?;
            let mut received = 0usize;
            while count.map_or(true, |n| received < n) {
                let Some(report) = monitor.recv_timeout(Duration::from_secs(5)) else {
                    println!("(no report for 5s)");
                    continue;
                };
                received += 1;
                println!(
                    "#{:<4} id {:3}  D {:02X} E {:02X} F {:02X}  ped {}  {}",
                    received,
                    report.controller_id,
                    report.port_d,
                    report.port_e,
                    report.port_f,
                    report.pedestrian_state,
                    report.lights().join(" ")
                );
            }
            monitor.stop().context("disabling monitoring")?;
        }
        Commands::FactoryReset { yes } => {
            if !yes {
                bail!("factory reset erases every table; pass --yes to confirm");
            }
            client.factory_reset().context("factory reset")?;
            println!("Controller reset to factory defaults");
        }
    }

    session.disconnect();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(cli)
}
