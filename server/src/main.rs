use clap::Parser;
use log::error;
use server::gateway::Gateway;
use server::identity::KeyringBridge;
use server::simulation;
use server::state::World;
use std::path::PathBuf;
use std::sync::Arc;

/// Main-method of the application.
/// Parses command-line arguments, loads the access-key keyring, then
/// runs the gateway and the simulation loop until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Tick rate (simulation updates per second)
        #[clap(short, long, default_value = "60")]
        tick_rate: u32,
        /// Path to the JSON keyring of issued access keys
        #[clap(short, long, default_value = "keyring.json")]
        keyring: PathBuf,
    }

    env_logger::init();
    let args = Args::parse();

    // A missing or unreadable keyring is the only startup-fatal
    // misconfiguration; everything at runtime is per-connection.
    let bridge: Arc<dyn server::identity::IdentityBridge> =
        Arc::new(KeyringBridge::from_file(&args.keyring)?);

    let world = World::new_shared();

    let address = format!("{}:{}", args.host, args.port);
    let gateway = Gateway::bind(&address, Arc::clone(&world), bridge).await?;

    // Spawn gateway accept loop
    let gateway_handle = tokio::spawn(gateway.run());

    // Spawn simulation loop
    let simulation_handle = {
        let world = Arc::clone(&world);
        tokio::spawn(simulation::run(world, args.tick_rate))
    };

    // Handle shutdown gracefully
    tokio::select! {
        result = gateway_handle => {
            if let Err(e) = result {
                error!("Gateway task panicked: {}", e);
            }
        }
        result = simulation_handle => {
            if let Err(e) = result {
                error!("Simulation task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
