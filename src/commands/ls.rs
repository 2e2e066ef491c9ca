use anyhow::Result;

use crate::config::Config;
use crate::reconciler::{Reconciler, StateFilter, state_symbol};

/// List known projects and their state, per §4.6.
pub fn run(config: Config, filter: StateFilter) -> Result<i32> {
    let reconciler = Reconciler::new(config);
    let mut projects = reconciler.ls(filter)?;
    projects.sort_by(|a, b| a.name.cmp(&b.name));

    if projects.is_empty() {
        println!("No projects found.");
        return Ok(0);
    }

    for project in projects {
        println!("{} {}", state_symbol(project.state), project.name);
    }

    Ok(0)
}
