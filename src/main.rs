use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use director::config::Config;
use director::reconciler::StateFilter;
use director::{commands, constants, envfile, sysexits, ui};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Extra configuration file, highest priority (spec §6 load order).
    #[arg(long)]
    config: Option<PathBuf>,

    /// `.env`-style file loaded into the process environment before
    /// configuration and spec interpolation are resolved.
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a project against a Director file.
    Up {
        /// Path to the Director file.
        #[arg(short, long, default_value = "appjail-director.yml")]
        file: PathBuf,
        /// Project name; defaults to `DIRECTOR_PROJECT` or a random name.
        #[arg(short, long)]
        project: Option<String>,
        /// Rebuild every service regardless of whether it differs.
        #[arg(long)]
        overwrite: bool,
    },
    /// Tear down a project's services.
    Down {
        /// Project name.
        #[arg(short, long)]
        project: String,
        /// Also remove the project directory once services are stopped.
        #[arg(short, long)]
        destroy: bool,
        /// Continue past a failed stop/destroy instead of aborting.
        #[arg(long)]
        ignore_failed: bool,
        /// Skip stopping/destroying services entirely.
        #[arg(long)]
        ignore_services: bool,
    },
    /// List known projects.
    Ls {
        /// Restrict the listing to projects in this state (default: all).
        #[arg(long, value_enum)]
        state: Option<StateArg>,
    },
    /// Human-readable dump of a project's state.
    Info {
        project: String,
    },
    /// JSON dump of a project's state.
    Describe {
        project: String,
    },
    /// Exit 0 if the project directory exists.
    Check {
        project: String,
    },
}

#[derive(Copy, Clone, ValueEnum)]
enum StateArg {
    All,
    Done,
    Failed,
    Unfinished,
    Destroying,
}

impl From<StateArg> for StateFilter {
    fn from(value: StateArg) -> Self {
        match value {
            StateArg::All => StateFilter::All,
            StateArg::Done => StateFilter::Done,
            StateArg::Failed => StateFilter::Failed,
            StateArg::Unfinished => StateFilter::Unfinished,
            StateArg::Destroying => StateFilter::Destroying,
        }
    }
}

fn main() -> std::process::ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    envfile::load(&cli.env_file).ok();

    let user_file = std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(".director/director.ini"));
    let env_config = std::env::var_os(constants::ENV_CONFIG).map(PathBuf::from);

    let config = match Config::load(
        Some(std::path::Path::new("/usr/local/etc/director.ini")),
        user_file.as_deref(),
        env_config.as_deref(),
        cli.config.as_deref(),
    ) {
        Ok(config) => config,
        Err(err) => {
            ui::print_error(&format!("{err}"));
            return std::process::ExitCode::from(sysexits::EX_CONFIG as u8);
        }
    };

    let result = match cli.command {
        Commands::Up { file, project, overwrite } => {
            commands::up(config, &file, project.as_deref(), overwrite)
        }
        Commands::Down { project, destroy, ignore_failed, ignore_services } => {
            commands::down(config, &project, destroy, ignore_failed, ignore_services)
        }
        Commands::Ls { state } => {
            commands::ls(config, state.map(StateFilter::from).unwrap_or(StateFilter::All))
        }
        Commands::Info { project } => commands::info(config, &project),
        Commands::Describe { project } => commands::describe(config, &project),
        Commands::Check { project } => commands::check(config, &project),
    };

    match result {
        Ok(code) => std::process::ExitCode::from(code as u8),
        Err(err) => {
            ui::print_error(&format!("{err}"));
            std::process::ExitCode::from(sysexits::EX_SOFTWARE as u8)
        }
    }
}
