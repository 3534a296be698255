//! Configuration loading shared by every command.

use std::path::Path;

use anyhow::Context;
use lyncs_core::RuntimeConfig;

/// Load the configuration file (or defaults) and apply command-line overrides.
pub fn resolve(
    path: Option<&Path>,
    workers: Option<usize>,
    capacity: Option<usize>,
) -> anyhow::Result<RuntimeConfig> {
    let mut config = match path {
        Some(path) => RuntimeConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }
    if let Some(capacity) = capacity {
        config = config.with_slot_capacity(capacity);
    }
    config.validate()?;

    tracing::debug!(
        "Using {} workers, {} calls per slot",
        config.workers,
        config.slot_capacity
    );
    Ok(config)
}

pub fn print(config: &RuntimeConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
