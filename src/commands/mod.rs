mod check;
mod describe;
mod down;
mod info;
mod ls;
mod up;

pub use check::run as check;
pub use describe::run as describe;
pub use down::run as down;
pub use info::run as info;
pub use ls::run as ls;
pub use up::run as up;

use crate::errors::DirectorError;
use crate::project::State;
use crate::sysexits::EX_SOFTWARE;

/// Exit code for an error that escaped a reconciler call: the error's own
/// code if it's a `DirectorError`, `EX_SOFTWARE` for anything else.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<DirectorError>()
        .map(DirectorError::exit_code)
        .unwrap_or(EX_SOFTWARE)
}

pub(crate) fn state_label(state: State) -> &'static str {
    match state {
        State::Done => "DONE",
        State::Failed => "FAILED",
        State::Unfinished => "UNFINISHED",
        State::Destroying => "DESTROYING",
    }
}
