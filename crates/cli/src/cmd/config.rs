//! Configuration file command

use crate::config;
use anyhow::Result;

/// Show example configuration
pub fn run_example() -> Result<()> {
    print!("{}", config::example_config());
    Ok(())
}
