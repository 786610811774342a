//! cep-server: Brazilian postal-code lookups through the ACBrCEP library.
//!
//! This is the main entry point for both the HTTP server and the one-shot
//! lookup commands.

mod config;
mod output;
mod routes;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::ServiceConfig;
use lib_acbr_ffi::{AcbrSession, CepService};
use lib_types::{AddressQuery, ResultEnvelope};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "cep-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format for one-shot commands
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Path to the service configuration file (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the platform builds of ACBrCEP
    #[arg(long)]
    lib_dir: Option<PathBuf>,

    /// ACBrLib INI file passed to the library
    #[arg(long)]
    ini: Option<PathBuf>,

    /// Key for encrypted INI values
    #[arg(long)]
    crypt_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    Text,
    #[default]
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve lookups over HTTP
    Serve {
        /// Address to bind
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Look up one CEP
    Cep {
        /// Postal code, punctuation allowed
        cep: String,
    },

    /// Look up addresses by street
    Address {
        #[arg(long)]
        city: String,

        /// Street type, e.g. Rua or Avenida
        #[arg(long)]
        street_type: String,

        #[arg(long)]
        street: String,

        /// Two-letter state code
        #[arg(long)]
        state: String,

        #[arg(long, default_value = "")]
        district: String,
    },

    /// Print library name and version
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            run_server(config)?;
        }
        Commands::Cep { ref cep } => {
            let service = build_service(&config)?;
            let envelope = service.search_by_cep(cep);
            finish(&service, &envelope, cli.format)?;
        }
        Commands::Address { ref city, ref street_type, ref street, ref state, ref district } => {
            let service = build_service(&config)?;
            let query = AddressQuery::new(city, street_type, street, state).with_district(district);
            let envelope = service.search_by_address(&query);
            finish(&service, &envelope, cli.format)?;
        }
        Commands::Info => {
            let service = build_service(&config)?;
            let envelope = service.initialize();
            finish(&service, &envelope, cli.format)?;
        }
    }

    Ok(())
}

/// Load the config file, if any, and apply command-line overrides.
fn resolve_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from {:?}", path);
            config::load_config(path)?
        }
        None => ServiceConfig::default(),
    };

    if let Some(lib_dir) = &cli.lib_dir {
        config.library.lib_dir = lib_dir.clone();
    }
    if let Some(ini) = &cli.ini {
        config.library.ini_path = ini.clone();
    }
    if let Some(key) = &cli.crypt_key {
        config.library.crypt_key = key.clone();
    }

    config::validate_config(&config)?;
    Ok(config)
}

/// Resolve and bind the library. Failures here are fatal.
fn build_service(config: &ServiceConfig) -> Result<CepService> {
    let lib_dir = &config.library.lib_dir;
    let session = AcbrSession::open(lib_dir, config.config_reference()).and_then(|mut session| {
        session.load()?;
        Ok(session)
    });

    match session {
        Ok(session) => Ok(CepService::new(session)),
        Err(e) if e.is_fatal() => {
            Err(e).with_context(|| format!("ACBrCEP is unavailable under {:?}", lib_dir))
        }
        Err(e) => Err(e).context("Failed to prepare ACBrCEP session"),
    }
}

/// Finalize, print the envelope, and turn a failure into a non-zero exit.
fn finish<T: Serialize>(
    service: &CepService,
    envelope: &ResultEnvelope<T>,
    format: OutputFormat,
) -> Result<()> {
    if let ResultEnvelope::Failure { code, message } = service.finalize() {
        tracing::warn!(code, %message, "Finalize failed");
    }

    output::write_envelope(&mut std::io::stdout().lock(), envelope, format)?;

    if let ResultEnvelope::Failure { code, .. } = envelope {
        anyhow::bail!("lookup failed with code {code}");
    }
    Ok(())
}

fn run_server(config: ServiceConfig) -> Result<()> {
    let service = Arc::new(build_service(&config)?);

    if config.server.eager_initialize {
        match service.initialize().into_result() {
            Ok(info) => tracing::info!(
                name = info.name.as_deref().unwrap_or("?"),
                version = info.version.as_deref().unwrap_or("?"),
                "Library ready"
            ),
            // Serving continues; the next lookup retries initialization.
            Err(err) => {
                tracing::warn!(error = %err, "Initialization failed, will retry on first lookup")
            }
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        let state = Arc::new(routes::AppState {
            service: Arc::clone(&service),
            request_timeout: config.request_timeout(),
        });

        let listener = tokio::net::TcpListener::bind(config.bind)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind))?;
        tracing::info!(bind = %config.bind, "Serving CEP lookups");

        axum::serve(listener, routes::router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        let service = Arc::clone(&service);
        let finalized = tokio::task::spawn_blocking(move || service.finalize())
            .await
            .context("Finalize task failed")?;
        if let ResultEnvelope::Failure { code, message } = finalized {
            tracing::warn!(code, %message, "Finalize failed");
        }

        anyhow::Ok(())
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_before_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cep.toml");
        std::fs::write(&path, "[library]\ncrypt_key = \"a\\u0000b\"\n").unwrap();
        let config_arg = path.to_string_lossy().into_owned();

        let cli = Cli::try_parse_from(["cep-server", "--config", &config_arg, "info"]).unwrap();
        assert!(resolve_config(&cli).is_err());

        let cli = Cli::try_parse_from([
            "cep-server",
            "--config",
            &config_arg,
            "--crypt-key",
            "secret",
            "info",
        ])
        .unwrap();
        assert_eq!(resolve_config(&cli).unwrap().library.crypt_key, "secret");
    }

    #[test]
    fn test_missing_library_is_reported_as_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServiceConfig::default();
        config.library.lib_dir = dir.path().to_path_buf();

        let Err(err) = build_service(&config) else {
            panic!("expected an empty lib dir to fail");
        };
        assert!(err.to_string().contains("ACBrCEP is unavailable"));
    }
}
