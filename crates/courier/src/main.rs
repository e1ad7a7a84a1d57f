use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use courier::register_builtin_channels;
use courier_core::Claims;
use courier_framework::JwtVerifier;
use courier_runtime::{CourierRuntime, RuntimeBuilder, RuntimeError};

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Route webhook events to chat and push channels")]
#[command(version)]
struct Cli {
    /// Configuration file (default: search for courier.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Configuration profile, overriding COURIER_PROFILE
    #[arg(long, short, global = true)]
    profile: Option<String>,

    /// JSON seed document for the in-memory store
    #[arg(long, global = true)]
    seed: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker until Ctrl+C (default)
    Serve,
    /// Print a delivery token for an inbound service
    Token {
        service_id: String,
        validation_key: String,
        /// Expiry as a unix timestamp
        #[arg(long)]
        exp: Option<u64>,
    },
}

impl Cli {
    fn builder(&self) -> RuntimeBuilder {
        let mut builder = CourierRuntime::builder();
        if let Some(path) = &self.config {
            builder = builder.config_file(path);
        }
        if let Some(profile) = &self.profile {
            builder = builder.profile(profile);
        }
        if let Some(seed) = &self.seed {
            builder = builder.seed_file(seed);
        }
        builder
    }
}

async fn serve(cli: &Cli) -> Result<(), RuntimeError> {
    let mut runtime = cli.builder().build()?;
    register_builtin_channels(&mut runtime);
    runtime.run().await
}

fn token(cli: &Cli, service_id: &str, validation_key: &str, exp: Option<u64>) -> Result<(), String> {
    let config = cli.builder().load_config().map_err(|e| e.to_string())?;
    let verifier = JwtVerifier::new(&config.auth.token_secret, config.auth.verify_expiry);
    let token = verifier
        .issue(&Claims {
            service_id: service_id.to_string(),
            validation_key: validation_key.to_string(),
            exp,
        })
        .map_err(|e| e.to_string())?;
    println!("{token}");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match &cli.command {
        None | Some(Command::Serve) => serve(&cli).await.map_err(|e| e.to_string()),
        Some(Command::Token {
            service_id,
            validation_key,
            exp,
        }) => token(&cli, service_id, validation_key, *exp),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("courier: {e}");
            ExitCode::FAILURE
        }
    }
}
