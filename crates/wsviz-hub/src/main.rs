mod api;
mod hub;
mod protocol;

use axum::{routing::get, Router};
use chrono::Utc;
use clap::Parser;
use hub::{ws_handler, HubConfig, HubState};
use std::{
    fs::{File, OpenOptions},
    future::IntoFuture,
    io,
    net::SocketAddr,
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wsviz_core::{
    config::{data_dir_from_file, WORKSPACE_PATH_FILE},
    DataLayout, DirectoryWatcher, SyncError, WorkspaceStore,
};

#[derive(Clone, Debug)]
struct Config {
    data_dir: String,
    host: String,
    port: u16,
    ws_port: u16,
    write_timeout: Duration,
    debug: bool,
    log_dir: String,
}

#[derive(Parser, Debug)]
#[command(name = "wsviz-hub")]
struct Args {
    #[arg(long, default_value = "")]
    data_dir: String,
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 3000)]
    port: u16,
    #[arg(long, default_value_t = 8080)]
    ws_port: u16,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = load_config();
    init_logging(&config);

    let data_dir = match resolve_data_dir(&config.data_dir) {
        Ok(dir) => dir,
        Err(err) => {
            error!(event = "data_dir_error", error = %err);
            return ExitCode::FAILURE;
        }
    };
    if !data_dir.is_dir() {
        error!(event = "data_dir_missing", path = %data_dir.display());
        return ExitCode::FAILURE;
    }

    let layout = DataLayout::new(&data_dir);
    let mut store = WorkspaceStore::new(layout.clone());
    match store.load_initial(Utc::now()) {
        Ok(skipped) => {
            for err in skipped {
                warn!(event = "initial_load_skipped", error = %err);
            }
        }
        Err(err) => {
            error!(event = "initial_load_failed", error = %err);
            return ExitCode::FAILURE;
        }
    }
    let hub = Arc::new(HubState::new(
        HubConfig {
            layout: layout.clone(),
            write_timeout: config.write_timeout,
        },
        store,
    ));

    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let _watcher = match DirectoryWatcher::start(&layout, move |signal| {
        let _ = signal_tx.send(signal);
    }) {
        Ok(watcher) => watcher,
        Err(err) => {
            error!(event = "watch_start_failed", error = %err);
            return ExitCode::FAILURE;
        }
    };
    tokio::spawn(hub.clone().run_watch_loop(signal_rx));

    let api_app = api::router(hub.clone());
    let ws_app = Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(hub.clone());

    let api_addr = format!("{}:{}", config.host, config.port);
    let ws_addr = format!("{}:{}", config.host, config.ws_port);
    let api_listener = match tokio::net::TcpListener::bind(&api_addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "bind_error", addr = %api_addr, error = %err);
            return ExitCode::FAILURE;
        }
    };
    let ws_listener = match tokio::net::TcpListener::bind(&ws_addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "bind_error", addr = %ws_addr, error = %err);
            return ExitCode::FAILURE;
        }
    };

    info!(
        event = "hub_start",
        data_dir = %data_dir.display(),
        api_addr = %api_addr,
        ws_addr = %ws_addr
    );

    let api_server = axum::serve(
        api_listener,
        api_app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    let ws_server = axum::serve(
        ws_listener,
        ws_app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        result = api_server.into_future() => {
            if let Err(err) = result {
                error!(event = "hub_error", server = "api", error = %err);
                return ExitCode::FAILURE;
            }
        }
        result = ws_server.into_future() => {
            if let Err(err) = result {
                error!(event = "hub_error", server = "ws", error = %err);
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!(event = "hub_shutdown");
        }
    }
    ExitCode::SUCCESS
}

fn load_config() -> Config {
    let args = Args::parse();
    Config {
        data_dir: env_fallback(&args.data_dir, "WSVIZ_DATA_DIR"),
        host: args.host,
        port: args.port,
        ws_port: args.ws_port,
        write_timeout: Duration::from_secs(args.write_timeout),
        debug: args.debug || env_true("WSVIZ_DEBUG"),
        log_dir: env_fallback(&args.log_dir, "WSVIZ_LOG_DIR"),
    }
}

/// Flag value, else the environment variable, else empty.
fn env_fallback(flag: &str, key: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => String::new(),
    }
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn resolve_data_dir(configured: &str) -> Result<PathBuf, SyncError> {
    if !configured.trim().is_empty() {
        return Ok(PathBuf::from(configured));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| SyncError::Config("home directory not found".to_string()))?;
    data_dir_from_file(&home.join(".claude").join(WORKSPACE_PATH_FILE))
}

const LOG_FILE: &str = "wsviz-hub.log";

/// `--debug` wins, then `WSVIZ_LOG_LEVEL`, then `info`.
fn log_level(debug: bool, configured: Option<String>) -> String {
    if debug {
        return "debug".to_string();
    }
    configured
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// Stdout always; the log file too when a log directory is configured.
fn init_logging(config: &Config) {
    let level = log_level(config.debug, std::env::var("WSVIZ_LOG_LEVEL").ok());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let file_layer = match open_log_file(&config.log_dir) {
        Ok(file) => file.map(|file| fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
        Err(err) => {
            eprintln!("log_file_error: {err}");
            None
        }
    };
    if let Err(err) = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
    {
        eprintln!("log_init_error: {err}");
    }
}

fn open_log_file(log_dir: &str) -> io::Result<Option<File>> {
    if log_dir.trim().is_empty() {
        return Ok(None);
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))
        .map(Some)
}
