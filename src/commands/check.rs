use anyhow::Result;

use crate::config::Config;
use crate::reconciler::Reconciler;

/// Exit 0 if the project directory exists, `EX_NOINPUT` otherwise, per §4.6.
pub fn run(config: Config, project: &str) -> Result<i32> {
    let reconciler = Reconciler::new(config);
    reconciler.check(project)
}
