//! BSD `sysexits.h` exit codes used at the CLI boundary.

pub const EX_OK: i32 = 0;
pub const EX_NOINPUT: i32 = 66;
pub const EX_DATAERR: i32 = 65;
pub const EX_CONFIG: i32 = 78;
pub const EX_SOFTWARE: i32 = 70;
pub const EX_NOPERM: i32 = 77;
pub const EX_UNAVAILABLE: i32 = 69;
