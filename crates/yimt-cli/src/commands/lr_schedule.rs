use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use yimt_core::config::load_config_from_path;

/// Prints `step<TAB>learning_rate` every `every` steps up to `steps`.
pub fn run(config: &Path, steps: u64, every: u64) -> Result<()> {
    if every == 0 {
        bail!("--every must be at least 1");
    }
    let run_config = load_config_from_path(config, None)
        .with_context(|| format!("Failed to load configuration '{}'", config.display()))?;
    let schedule = run_config
        .schedule
        .ok_or_else(|| anyhow!("'{}' has no [schedule] section", config.display()))?
        .build()?;

    for step in (0..steps).step_by(every as usize) {
        println!("{}\t{:.8}", step, schedule.learning_rate(step));
    }
    Ok(())
}
