use anyhow::Result;
use serde_json::json;

use crate::config::Config;
use crate::reconciler::Reconciler;

use super::{exit_code_for, state_label};

/// JSON dump of a project's state, per §4.6.
pub fn run(config: Config, project: &str) -> Result<i32> {
    let reconciler = Reconciler::new(config);

    let info = match reconciler.info(project) {
        Ok(info) => info,
        Err(err) => {
            crate::ui::print_error(&format!("{err}"));
            return Ok(exit_code_for(&err));
        }
    };

    let services: Vec<_> = info
        .services
        .iter()
        .map(|service| {
            json!({
                "name": service.name,
                "jail": service.jail,
                "status": service.status,
            })
        })
        .collect();

    let doc = json!({
        "name": info.name,
        "state": info.state.map(state_label),
        "last_log": info.last_log,
        "locked": info.locked,
        "services": services,
    });

    println!("{}", serde_json::to_string_pretty(&doc)?);

    Ok(0)
}
