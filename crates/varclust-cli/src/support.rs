use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use varclust_engine::JobConfig;

/// Log to stderr, filtered by `RUST_LOG` (default `info`). Stdout stays
/// reserved for command output.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

pub fn exit_with_error(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

pub fn store_dir_or_exit(store: &str) -> PathBuf {
    let dir = PathBuf::from(store);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        exit_with_error(format!("failed to create store dir {}: {e}", dir.display()));
    }
    dir
}

pub fn load_config_or_exit(config: Option<&str>, store_dir: &Path) -> JobConfig {
    JobConfig::load_or_default(config.map(Path::new), store_dir)
        .unwrap_or_else(|e| exit_with_error(e))
}

pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => exit_with_error(format!("failed to render json: {e}")),
    }
}

pub fn format_accessions(accessions: &[u64], prefix: &str) -> String {
    accessions
        .iter()
        .map(|a| format!("{prefix}{a}"))
        .collect::<Vec<_>>()
        .join(", ")
}
