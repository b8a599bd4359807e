use std::{error::Error, io, path::PathBuf, process, sync::Arc};

use clap::{Parser, Subcommand};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, error, info, warn};
use trickwatch::{
    config::Config,
    core::{
        catalog::Catalog,
        control::{self, HELP},
        dashboard::ConsoleDashboard,
        export::{CsvExporter, TermLogger},
        history::{History, Sample},
        monitor::{Monitor, Sink, Update},
        readiness::Readiness,
    },
    logger::LoggerManager,
    print_error,
};
use trickwatch_varserver::{fetch_once, ClientError, Session, VarServerManager};

const PROBE_REPORT_EVERY: u64 = 10;

/// Terminal dashboard for a running Trick simulation.
#[derive(Parser, Debug)]
#[command(name = "trickwatch", version, about)]
struct Cli {
    /// Configuration file (overrides TRICKWATCH_CONFIG)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Variable server host
    #[arg(long)]
    host: Option<String>,

    /// Variable server port
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Run the dashboard until Ctrl+C
    Monitor,
    /// Test the connection and print every 10th sample
    Probe {
        /// Seconds to read for
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
    },
    /// Print one snapshot as JSON
    Snapshot,
    /// List catalog terms starting with PREFIX
    Terms { prefix: Option<String> },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut cfg = Config::new(cli.config.as_deref()).unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });
    if let Some(host) = cli.host {
        cfg.varserver.host = host;
    }
    if let Some(port) = cli.port {
        cfg.varserver.port = port;
    }

    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting trickwatch version {}...", env!("CARGO_PKG_VERSION"));
    debug!("{:#?}", cfg.varserver);
    info!("Log level: {}", cfg.logger.level);

    let catalog = Catalog::from_config(&cfg.catalog).unwrap_or_else(|e| {
        error!("Failed to build term catalog: {}", e);
        process::exit(1);
    });

    let result = match cli.command.unwrap_or(Command::Monitor) {
        Command::Monitor => monitor(&cfg, catalog).await,
        Command::Probe { duration } => probe(&cfg, catalog, duration).await,
        Command::Snapshot => snapshot(&cfg, catalog).await,
        Command::Terms { prefix } => {
            terms(&catalog, prefix.as_deref().unwrap_or(""));
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
    Ok(())
}

async fn monitor(cfg: &Config, catalog: Catalog) -> Result<(), Box<dyn Error>> {
    let catalog = Arc::new(catalog);
    let readiness = Readiness::default();

    let dashboard = ConsoleDashboard::new(&catalog, &cfg.monitor, io::stdout())?;
    let mut monitor = Monitor::new(catalog.clone(), &cfg.monitor, readiness.clone())?
        .with_sink(Box::new(dashboard));

    let term_logger = TermLogger::from_config(&cfg.export, &catalog)?;
    if !term_logger.is_empty() {
        term_logger.prepare()?;
        info!("Logging {} terms to files", term_logger.terms().len());
        monitor = monitor.with_sink(Box::new(term_logger));
    }
    monitor = monitor.with_exporter(CsvExporter::from_config(&cfg.export), cfg.export.auto_save);
    match control::spawn_reader(io::BufReader::new(io::stdin())) {
        Ok(controls) => {
            monitor = monitor.with_controls(controls);
            println!("{HELP}");
        }
        Err(e) => warn!("Keyboard controls unavailable: {}", e),
    }

    let manager = VarServerManager::from_config(cfg.varserver.clone(), catalog.subscription())?;
    let mut instance = manager.start();
    readiness.start_listening(instance.state_receiver());
    let snapshots = instance
        .snapshots()
        .ok_or("snapshot stream already taken")?;
    let cancel = instance.cancel_token();

    let mut monitor_task = tokio::spawn(monitor.run(snapshots, cancel.clone()));
    let report = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received Ctrl+C, initiating graceful shutdown...");
            cancel.cancel();
            (&mut monitor_task).await?
        }
        report = &mut monitor_task => report?,
    };
    debug!("{:?}", report);

    instance.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}

async fn probe(cfg: &Config, catalog: Catalog, duration: u64) -> Result<(), Box<dyn Error>> {
    let rule = "=".repeat(70);
    println!("{rule}");
    println!("Trick Variable Server Connection Test");
    println!("{rule}");
    println!("Host: {}", cfg.varserver.host);
    println!("Port: {}", cfg.varserver.port);
    println!("Duration: {} seconds", duration);
    println!("{rule}");

    let mut session = match Session::open(&cfg.varserver, Arc::new(catalog.subscription())).await {
        Ok(session) => session,
        Err(e) => {
            println!("CONNECTION FAILED: {e}");
            println!("Possible reasons:");
            println!("  1. Trick simulation is not running");
            println!("  2. Incorrect host or port");
            println!("  3. Firewall blocking connection");
            println!("  4. Simulation not in RUN mode");
            return Err(e.into());
        }
    };
    println!("Connected to {}, receiving data (Ctrl+C to stop)", session.peer());

    let mut monitor_cfg = cfg.monitor.clone();
    monitor_cfg.report_every = PROBE_REPORT_EVERY;
    monitor_cfg.plot.enabled = false;
    let mut dashboard = ConsoleDashboard::new(&catalog, &monitor_cfg, io::stdout())?;
    let mut history = History::new(monitor_cfg.history_capacity);

    let started = Instant::now();
    let deadline = sleep_until(started + Duration::from_secs(duration));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(deadline, ctrl_c);

    let mut count = 0u64;
    let failure = loop {
        tokio::select! {
            _ = &mut deadline => {
                println!("Test duration reached. Stopping...");
                break None;
            }
            _ = &mut ctrl_c => {
                println!("Test interrupted by user.");
                break None;
            }
            next = session.next_snapshot() => match next {
                Ok(snapshot) => {
                    count += 1;
                    history.push(Sample::new(snapshot, catalog.time_term()));
                    if let Some(sample) = history.latest() {
                        let update = Update {
                            count,
                            sample,
                            history: &history,
                            armed: &[],
                            tripped: &[],
                        };
                        dashboard.on_sample(&update).await?;
                    }
                }
                Err(ClientError::Protocol(e)) => {
                    println!("WARNING: Received incomplete data ({e})");
                }
                Err(e) => break Some(e),
            }
        }
    };
    session.close().await;

    let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
    println!("{rule}");
    println!("Test Summary:");
    println!("  Total samples received: {count}");
    println!("  Average rate: {:.1} Hz", count as f64 / elapsed);
    println!("{rule}");

    if let Some(e) = failure {
        println!("CONNECTION LOST");
        return Err(e.into());
    }
    if count == 0 {
        println!("WARNING: No data received. Is the simulation running?");
        return Err("no data received from the variable server".into());
    }
    println!("TEST PASSED - Connection and data retrieval working!");
    Ok(())
}

async fn snapshot(cfg: &Config, catalog: Catalog) -> Result<(), Box<dyn Error>> {
    let snapshot = fetch_once(&cfg.varserver, catalog.subscription()).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn terms(catalog: &Catalog, prefix: &str) {
    let matches = catalog.search(prefix);
    if matches.is_empty() {
        warn!("No terms start with '{}'", prefix.trim());
    }
    for label in matches {
        let variables = catalog
            .get(label)
            .map(|c| c.variables().join(", "))
            .unwrap_or_default();
        println!("{label}\t{variables}");
    }
}
