use std::path::Path;

use anyhow::Result;
use feedsync_core::FeedSyncConfig;
use owo_colors::OwoColorize;

pub fn run(config: &FeedSyncConfig, explicit_path: Option<&Path>) -> Result<()> {
    let config_path = match explicit_path {
        Some(path) => path.to_path_buf(),
        None => FeedSyncConfig::config_path()?,
    };
    let data_path = config.data_path();

    println!("{}", "Paths".bold());
    println!("  Config:  {}", config_path.display());
    println!("  Data:    {}", data_path.display());
    println!("  State:   {}", data_path.join("state.json").display());

    println!();
    println!("{}", "Effective configuration".bold());
    for line in config.to_toml()?.lines() {
        println!("  {line}");
    }

    Ok(())
}
