use std::path::Path;

use anyhow::Result;

use crate::config::Config;
use crate::reconciler::Reconciler;
use crate::sysexits::EX_DATAERR;
use crate::ui;

use super::exit_code_for;

/// Bring a project's services in line with a Director file, per §4.6.
pub fn run(config: Config, file: &Path, project: Option<&str>, overwrite: bool) -> Result<i32> {
    if !file.is_file() {
        ui::print_error(&format!("{}: no such file", file.display()));
        return Ok(EX_DATAERR);
    }

    let project_name = Reconciler::resolve_project_name(project);
    let reconciler = Reconciler::new(config);

    match reconciler.up(file, &project_name, overwrite) {
        Ok(()) => Ok(0),
        Err(err) => {
            ui::print_error(&format!("{err}"));
            Ok(exit_code_for(&err))
        }
    }
}
