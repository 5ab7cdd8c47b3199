//! Minimal binary entry point (C9): wires the config loader (C6) into a
//! constellation bootstrap (C5) and exits. Does no flag parsing of its own —
//! a couple of environment variables are all that's read here, matching
//! `SPEC_FULL.md` §1's "runnable but otherwise bare" scope for the runtime.

use std::sync::Arc;

use log::{error, info};
use redskull::config::load_sentinel_config_file;
use redskull::kv::MemoryKvStore;
use redskull::redis::RustisBackend;
use redskull::{Constellation, ConstellationSettings};

const CONFIG_PATH_VAR: &str = "REDSKULL_SENTINEL_CONFIG";
const LOCAL_ADDRESS_VAR: &str = "REDSKULL_LOCAL_ADDRESS";
const DEFAULT_CONFIG_PATH: &str = "/etc/redis/sentinel.conf";

#[tokio::main]
async fn main() {
    env_logger::init();

    let config_path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
    let local_override = std::env::var(LOCAL_ADDRESS_VAR).ok();

    info!("loading sentinel config from {config_path}");
    let parsed = match load_sentinel_config_file(&config_path) {
        Ok(parsed) => parsed,
        Err(err) => {
            error!("failed to load sentinel config {config_path}: {err}");
            std::process::exit(1);
        }
    };

    let backend = Arc::new(RustisBackend::new());
    let kv = Arc::new(MemoryKvStore::new());

    match Constellation::bootstrap(parsed, local_override, backend, kv, ConstellationSettings::default()).await {
        Ok(constellation) => {
            info!(
                "bootstrap complete: {} pods, {} sentinels",
                constellation.pod_count(),
                constellation.sentinel_count()
            );
        }
        Err(err) => {
            error!("fatal bootstrap failure: {err}");
            std::process::exit(1);
        }
    }
}
