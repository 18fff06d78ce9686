//! Init command - create the config file and data directory

use crate::config::Config;
use anyhow::{Context, Result};
use console::style;

/// Run the init command
pub fn run(config: &Config) -> Result<()> {
    println!("\n{} Initializing unnatural\n", style("*").bold());

    let config_path = Config::init_user_config().context("Failed to write config file")?;
    println!(
        "{} Config at {}",
        style("✓").green(),
        style(config_path.display()).cyan()
    );

    let data_dir = config.data_dir();
    std::fs::create_dir_all(data_dir.join("corpora"))
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    println!(
        "{} Data directory {}",
        style("✓").green(),
        style(data_dir.display()).cyan()
    );

    println!(
        "\nNext: {} to build a corpus",
        style("unnatural train <files..>").cyan()
    );
    Ok(())
}
