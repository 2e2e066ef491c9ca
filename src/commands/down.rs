use anyhow::Result;

use crate::config::Config;
use crate::reconciler::Reconciler;
use crate::ui;

use super::exit_code_for;

/// Tear down (and optionally destroy) a project, per §4.6.
pub fn run(
    config: Config,
    project: &str,
    destroy: bool,
    ignore_failed: bool,
    ignore_services: bool,
) -> Result<i32> {
    let reconciler = Reconciler::new(config);

    match reconciler.down(project, destroy, ignore_failed, ignore_services) {
        Ok(()) => {
            ui::print_success(&format!("{project}: done"));
            Ok(0)
        }
        Err(err) => {
            ui::print_error(&format!("{err}"));
            Ok(exit_code_for(&err))
        }
    }
}
