use anyhow::Result;

use crate::config::Config;
use crate::reconciler::Reconciler;

use super::{exit_code_for, state_label};

/// Human-readable dump of a project's state, per §4.6.
pub fn run(config: Config, project: &str) -> Result<i32> {
    let reconciler = Reconciler::new(config);

    let info = match reconciler.info(project) {
        Ok(info) => info,
        Err(err) => {
            crate::ui::print_error(&format!("{err}"));
            return Ok(exit_code_for(&err));
        }
    };

    println!("Project: {}", info.name);
    println!(
        "State: {}",
        info.state.map(state_label).unwrap_or("UNKNOWN")
    );
    println!("Last log: {}", info.last_log.as_deref().unwrap_or("-"));
    println!("Locked: {}", if info.locked { "yes" } else { "no" });
    println!();
    println!("Services:");

    if info.services.is_empty() {
        println!("  (none)");
    }

    for service in &info.services {
        println!(
            "  {:<20} jail={:<16} status={}",
            service.name,
            service.jail.as_deref().unwrap_or("-"),
            service.status
        );
    }

    Ok(0)
}
