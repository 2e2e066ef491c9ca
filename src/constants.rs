/// Name of the Director file copied into a project directory as the
/// current (last-applied) specification.
pub const DIRECTOR_FILE: &str = "appjail-director.yml";

/// Default priority for a service that does not set one.
pub const DEFAULT_PRIORITY: i64 = 99;

/// Default `serial` for a service that does not set one.
pub const DEFAULT_SERIAL: i64 = 0;

/// Default shell used to run a script's `text`.
pub const DEFAULT_SCRIPT_SHELL: &str = "/bin/sh -c";

/// Default script invocation type.
pub const DEFAULT_SCRIPT_TYPE: &str = "jexec";

/// Default Makejail path for a service.
pub const DEFAULT_MAKEJAIL: &str = "Makejail";

/// Default volume type when neither the volume nor the document sets one.
pub const DEFAULT_VOLUME_TYPE: &str = "nullfs";

/// Default fstab options for a volume.
pub const DEFAULT_VOLUME_OPTIONS: &str = "rw";

/// Default per-operation timeout, in seconds.
pub const DEFAULT_COMMAND_TIMEOUT: u64 = 1800;

/// Default logs directory.
pub const DEFAULT_LOGS_DIR: &str = "~/.director/logs";

/// Default projects directory.
pub const DEFAULT_PROJECTS_DIR: &str = "~/.director/projects";

/// Default locks directory.
pub const DEFAULT_LOCKS_DIR: &str = "/tmp/director/locks";

/// Environment variable naming the config file to load.
pub const ENV_CONFIG: &str = "DIRECTOR_CONFIG";

/// Environment variable naming the default project.
pub const ENV_PROJECT: &str = "DIRECTOR_PROJECT";

/// `appjail` binary name resolved on `PATH`.
pub const APPJAIL_BIN: &str = "appjail";
