//! CLI command implementations
//!
//! `init` is synchronous. `serve` and `run` load the config, apply the log
//! level, build a tokio runtime and open the store before doing anything else.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::http_server::HttpServer;
use crate::observability::{log_event_with_fields, Event, Logger};
use crate::store::{KeyValueStore, MemoryStore, RedisStore};
use crate::txn::{RaceWindow, TransactionCoordinator};

use super::args::{Command, Scenario};
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Serve {
            config,
            port,
            memory,
        } => serve(&config, port, memory),
        Command::Run {
            scenario,
            config,
            memory,
            mode,
        } => run_scenario(scenario, &config, memory, &mode),
    }
}

/// Write a default config file. Refuses to overwrite.
pub fn init(config_path: &Path) -> CliResult<()> {
    AppConfig::write_default(config_path)?;
    write_response(json!({
        "initialized": true,
        "config": config_path.display().to_string(),
    }))
}

/// Serve the scenarios over HTTP until Ctrl-C
pub fn serve(config_path: &Path, port: Option<u16>, memory: bool) -> CliResult<()> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port {
        config.http.port = port;
    }

    let rt = runtime()?;
    rt.block_on(async {
        let store = open_store(&config, memory).await?;
        let coordinator = Arc::new(TransactionCoordinator::new(store));
        let server = HttpServer::with_config(config.http.clone(), coordinator, config.scenario.clone());
        server
            .start()
            .await
            .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))
    })
}

/// Run one scenario and print its response
pub fn run_scenario(scenario: Scenario, config_path: &Path, memory: bool, mode: &str) -> CliResult<()> {
    let config = load_config(config_path)?;
    let window = RaceWindow::from_mode(
        mode,
        Duration::from_millis(config.scenario.mutator_delay_ms),
        Duration::from_millis(config.scenario.hold_ms),
    )
    .map_err(CliError::config_error)?;

    let rt = runtime()?;
    let result: CliResult<Value> = rt.block_on(async {
        let store = open_store(&config, memory).await?;
        let coordinator = TransactionCoordinator::new(store);
        let response = match scenario {
            Scenario::WatchedUpdate => coordinator
                .run_watched_update(&config.scenario.watch_key, window)
                .await?
                .to_response(),
            Scenario::SyntaxFault => coordinator.run_batch_with_syntax_fault().await?.to_response(),
            Scenario::LogicFault => coordinator.run_batch_with_logic_fault().await?.to_response(),
        };
        Ok(response)
    });

    match result {
        Ok(response) => write_response(response),
        Err(e) => {
            write_error(e.code_str(), e.message())?;
            Err(e)
        }
    }
}

/// Load the config file, or defaults if it does not exist, and apply the
/// configured log level
fn load_config(config_path: &Path) -> CliResult<AppConfig> {
    let config = if config_path.exists() {
        AppConfig::load(config_path)?
    } else {
        AppConfig::default()
    };
    Logger::set_min_severity(config.severity()?);
    log_event_with_fields(
        Event::ConfigLoaded,
        &[
            ("path", &config_path.display().to_string()),
            ("store", &config.store.addr),
        ],
    );
    Ok(config)
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))
}

async fn open_store(config: &AppConfig, memory: bool) -> CliResult<Arc<dyn KeyValueStore>> {
    if memory {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = RedisStore::connect(config.store.clone()).await?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::errors::CliErrorCode;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_config_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kvtxn.json");

        init(&path).unwrap();
        assert!(AppConfig::load(&path).is_ok());

        let err = init(&path).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::AlreadyInitialized);
    }

    #[test]
    fn test_run_logic_fault_in_memory() {
        let dir = TempDir::new().unwrap();
        run_scenario(Scenario::LogicFault, &dir.path().join("absent.json"), true, "timed").unwrap();
    }

    #[test]
    fn test_run_rejects_unknown_mode() {
        let dir = TempDir::new().unwrap();
        let err = run_scenario(
            Scenario::WatchedUpdate,
            &dir.path().join("absent.json"),
            true,
            "sideways",
        )
        .unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::ConfigError);
    }

    #[test]
    fn test_run_reports_unreachable_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kvtxn.json");
        // Port 1 is never a listening store
        fs::write(
            &path,
            r#"{"store": {"addr": "127.0.0.1:1", "min_idle_conns": 0, "dial_timeout_ms": 500}}"#,
        )
        .unwrap();

        let err = run_scenario(Scenario::SyntaxFault, &path, false, "timed").unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::StoreUnavailable);
    }
}
