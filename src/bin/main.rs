use std::path::PathBuf;
use std::time::Duration;

use blequeue::config::{self, LinkSettings};
use blequeue::permission::{GrantedPermissions, PermissionChecker};
use blequeue::simulation::{SimulatedFactory, SimulatedPeripheral};
use blequeue::{Connector, LinkError, OperationQueue};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;

/// Serialized BLE operation queue, driven against a simulated peripheral
#[derive(Parser)]
#[command(name = "blequeue")]
#[command(version)]
#[command(about = "Serialized BLE operation queue with a simulated peripheral")]
struct Cli {
    /// Config file layered over the user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a simulated peripheral and queue reads against it
    Simulate {
        /// Number of reads to queue once connected
        #[arg(long, default_value_t = 5)]
        operations: usize,

        /// Driver latency per operation (overrides the config)
        #[arg(long)]
        latency_ms: Option<u64>,

        /// Inject a disconnect this long after connecting
        #[arg(long)]
        disconnect_after_ms: Option<u64>,

        /// Make the connect operation fail
        #[arg(long)]
        fail_connect: bool,
    },
    /// Print the effective settings as TOML
    Config,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let outcome = config::load_settings(cli.config.as_deref());
    for event in &outcome.events {
        event.log();
    }
    let settings = outcome.settings;

    match cli.command {
        Commands::Config => match settings.to_toml() {
            Ok(rendered) => print!("{}", rendered),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Simulate {
            operations,
            latency_ms,
            disconnect_after_ms,
            fail_connect,
        } => {
            let options = SimulateOptions {
                operations,
                latency: Duration::from_millis(latency_ms.unwrap_or(settings.simulation.latency_ms)),
                disconnect_after: disconnect_after_ms.map(Duration::from_millis),
                fail_connect,
            };
            if let Err(e) = simulate(settings, options).await {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

struct SimulateOptions {
    operations: usize,
    latency: Duration,
    disconnect_after: Option<Duration>,
    fail_connect: bool,
}

async fn simulate(settings: LinkSettings, options: SimulateOptions) -> Result<(), LinkError> {
    let queue = OperationQueue::new()?;
    let peripheral = SimulatedPeripheral::new(settings.simulation.address.clone(), options.latency);
    peripheral.set_fail_connect(options.fail_connect);

    let capability = PermissionChecker::new(
        GrantedPermissions::new(settings.permissions.granted.iter().cloned()),
        settings.permissions.scan.iter().cloned(),
    );
    let connector = Connector::new(
        queue.clone(),
        SimulatedFactory::new(peripheral.clone(), queue),
        capability,
    );

    let mut lifecycle = connector.prepare_connection(settings.connection.clone());
    let connection = match lifecycle.next().await {
        Some(Ok(connection)) => connection,
        Some(Err(e)) => return Err(e),
        None => return Ok(()),
    };
    println!("connected to {}", connection.address());

    if let Some(delay) = options.disconnect_after {
        peripheral.inject_disconnect_after(delay, 8);
    }

    let reads = (0..options.operations).map(|index| {
        let mut stream = connection.read("battery");
        async move {
            match stream.next().await {
                Some(Ok(value)) => println!("read {}: {}", index, String::from_utf8_lossy(&value)),
                Some(Err(e)) => println!("read {} failed: {}", index, e),
                None => println!("read {}: no value", index),
            }
        }
    });
    futures_util::future::join_all(reads).await;

    if options.disconnect_after.is_some() {
        match lifecycle.next().await {
            Some(Err(e)) => println!("lifecycle ended: {}", e),
            _ => println!("lifecycle ended"),
        }
    } else {
        drop(lifecycle);
        println!("disconnected by caller");
    }

    println!(
        "max concurrent operations: {}, cleanups: {}",
        peripheral.max_overlap(),
        peripheral.cleanup_count()
    );
    Ok(())
}
