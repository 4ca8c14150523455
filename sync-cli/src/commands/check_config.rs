//! Validate a sync engine config file.

use anyhow::{Context, Result};
use offgrid_sync_client::SyncConfig;
use std::path::Path;

/// Run the check-config command.
pub fn run(path: &Path) -> Result<()> {
    let config = SyncConfig::from_file(path).context("Config check failed")?;
    tracing::info!("Config {} is valid", path.display());
    print!("{}", summary(&config));
    Ok(())
}

fn summary(config: &SyncConfig) -> String {
    let names = |namespaces: &[offgrid_sync_types::Namespace]| {
        namespaces
            .iter()
            .map(|ns| ns.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let autostop = match config.autostop_data_sync_after() {
        Some(after) => format!("{:?}", after),
        None => "off".to_string(),
    };

    let mut out = String::new();
    out.push_str(&format!("throttle:            {:?}\n", config.throttle()));
    out.push_str(&format!(
        "discovery key grace: {:?}\n",
        config.discovery_key_grace()
    ));
    out.push_str(&format!("autostop:            {}\n", autostop));
    out.push_str(&format!(
        "namespaces:          {}\n",
        names(config.namespaces.all())
    ));
    out.push_str(&format!(
        "presync:             {}\n",
        names(config.namespaces.presync())
    ));
    out
}
