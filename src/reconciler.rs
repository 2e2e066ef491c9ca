//! Top-level orchestrator of a single `up` or `down` run.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use log::{info, warn};

use crate::config::Config;
use crate::constants::ENV_PROJECT;
use crate::errors::DirectorError;
use crate::jail_driver::JailDriver;
use crate::logsink::LogSink;
use crate::project::{Project, State, Where};
use crate::random_name;
use crate::signal_guard::SignalGuard;
use crate::sysexits::EX_NOINPUT;

pub struct Reconciler {
    config: Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    All,
    Done,
    Failed,
    Unfinished,
    Destroying,
}

pub struct ProjectSummary {
    pub name: String,
    pub state: Option<State>,
}

pub struct ServiceStatus {
    pub name: String,
    pub jail: Option<String>,
    pub status: i32,
}

pub struct ProjectInfo {
    pub name: String,
    pub state: Option<State>,
    pub last_log: Option<String>,
    pub locked: bool,
    pub services: Vec<ServiceStatus>,
}

impl Reconciler {
    pub fn new(config: Config) -> Self {
        Reconciler { config }
    }

    fn driver(&self) -> JailDriver {
        JailDriver::new(Arc::new(Mutex::new(HashMap::new())))
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.config.commands_timeout))
    }

    /// Resolve the effective project name per §4.6 step 2: explicit flag,
    /// else `DIRECTOR_PROJECT`, else a random one.
    pub fn resolve_project_name(explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .or_else(|| std::env::var(ENV_PROJECT).ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(random_name::generate)
    }

    pub fn up(&self, spec_file: &Path, project_name: &str, overwrite: bool) -> Result<()> {
        let driver = self.driver();
        let signal_guard = SignalGuard::install(driver.clone())?;

        let spec_dir = spec_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::env::set_current_dir(spec_dir)?;
        let spec_file_name = spec_file.file_name().map(Path::new).unwrap_or(spec_file);

        let project = Project::new(
            project_name,
            spec_file_name,
            &self.config.projects_dir,
            Some(&self.config.locks_dir),
        )?;

        project.open()?;
        let result = self.up_inner(&project, &driver, &signal_guard, overwrite);
        project.close();
        result
    }

    fn up_inner(
        &self,
        project: &Project,
        driver: &JailDriver,
        signal_guard: &SignalGuard,
        overwrite: bool,
    ) -> Result<()> {
        project.set_state(State::Unfinished)?;

        let services = project.services(Where::Next)?;
        let mut to_remove = project.removed_services()?;

        for service in &services {
            let differs = project.differ(service)?;
            let failed = project.has_failed(service);
            let mtime_dirty = !project.ignore_mtime(service, Where::Next)? && project.check_makejail_mtime(service)?;
            let options_dirty = !project.reset_options(service, Where::Next)? && project.differ_options()?;

            if overwrite || differs || failed || mtime_dirty || options_dirty {
                to_remove.insert(service.clone());
            }
        }

        let mut did_something = !to_remove.is_empty();

        for service in &to_remove {
            self.remove_service(project, driver, service)?;

            if !services.contains(service) {
                project.forget_service(service).ok();
            }
        }

        // `services` iterates in document order (an `IndexSet`); `sort_by_key`
        // is stable, so same-priority services keep that relative order
        // (spec §5: "ties broken by the specification's service-mapping
        // iteration order").
        let mut ordered: Vec<&String> = services.iter().collect();
        ordered.sort_by_key(|service| {
            project.priority(service, Where::Next).unwrap_or(crate::constants::DEFAULT_PRIORITY)
        });

        for service in ordered {
            if self.create_service(project, driver, signal_guard, service)? {
                did_something = true;
            }
        }

        project.set_state(State::Done)?;

        if !did_something {
            println!("Nothing to do.");
        } else {
            println!("Finished: {}", project.name());
        }

        Ok(())
    }

    fn remove_service(&self, project: &Project, driver: &JailDriver, service: &str) -> Result<()> {
        let Some(jail) = project.get_jail_name(service, Where::Current, false, true)? else {
            return Ok(());
        };

        if driver.check(&jail)? != 0 {
            return Ok(());
        }

        let log = LogSink::new(&self.config.logs_dir);
        project.set_key("last_log", &log.base().display().to_string())?;

        if driver.status(&jail)? == 0 {
            let sink = log.open(&format!("{service}/stop.log"))?;
            info!("stopping {jail}");
            driver.stop(&jail, Some(&sink), self.timeout())?;
        }

        let sink = log.open(&format!("{service}/destroy.log"))?;
        info!("destroying {jail}");
        let status = driver.destroy(
            &jail,
            self.config.jails_remove_recursive,
            self.config.jails_remove_force,
            Some(&sink),
            self.timeout(),
        )?;

        if status != 0 {
            project.set_state(State::Failed)?;
            project.set_fail(service)?;
            return Err(DirectorError::ExternalStatus {
                service: service.to_string(),
                operation: "destroy".to_string(),
                status,
            }
            .into());
        }

        Ok(())
    }

    fn create_service(
        &self,
        project: &Project,
        driver: &JailDriver,
        signal_guard: &SignalGuard,
        service: &str,
    ) -> Result<bool> {
        let mut did_something = false;

        let last_jname = project.get_jail_name(service, Where::Current, false, true).unwrap_or(None);
        let has_last_name = last_jname.is_some();
        let next_jname = project.get_jail_name(service, Where::Next, !has_last_name, true)?;

        let jail = match (&last_jname, &next_jname) {
            (Some(last), Some(next)) if last != next => next.clone(),
            (Some(last), _) => last.clone(),
            (None, Some(next)) => next.clone(),
            (None, None) => anyhow::bail!("{service}: could not resolve a jail name"),
        };

        signal_guard.set_current_jail(Some(jail.clone()));

        let log = LogSink::new(&self.config.logs_dir);
        project.set_key("last_log", &log.base().display().to_string())?;

        if driver.check(&jail)? != 0 || driver.is_dirty(&jail)? != 0 {
            did_something = true;

            let reset_options = project.reset_options(service, Where::Next)?;
            let mut options = if reset_options { Vec::new() } else { project.options(Where::Next)? };
            options.extend(project.local_options(service, Where::Next)?);

            let arguments = project.arguments(service, Where::Next)?;
            let environment = project.environment(service, Where::Next)?;
            let volumes = project.jail_volumes(service, Where::Next)?;
            let volume_defs = project.volumes(Where::Next)?;
            let default_volume_type = project
                .default_volume_type(Where::Next)?
                .unwrap_or_else(|| crate::constants::DEFAULT_VOLUME_TYPE.to_string());
            let makejail_path = project.makejail_path(service, Where::Next)?;

            project.set_makejail_mtime(service)?;

            let sink = log.open(&format!("{service}/makejail.log"))?;
            println!("Creating {service} ({jail}) ... ");
            let status = driver.makejail(
                &jail,
                &makejail_path,
                &arguments,
                &environment,
                &volumes,
                &volume_defs,
                &options,
                &default_volume_type,
                Some(&sink),
                self.timeout(),
            )?;

            if status != 0 {
                println!("{}", "FAIL!".red());
                project.set_state(State::Failed)?;
                project.set_fail(service)?;
                return Err(DirectorError::ExternalStatus {
                    service: service.to_string(),
                    operation: "makejail".to_string(),
                    status,
                }
                .into());
            }
            println!("{}", "Done.".green());

            let start_arguments = project.start_arguments(service, Where::Next)?;
            let start_environment = project.start_environment(service, Where::Next)?;

            if !start_arguments.is_empty() || !start_environment.is_empty() {
                let sink = log.open(&format!("{service}/enable-start.log"))?;
                if let Err(err) =
                    driver.enable_start(&jail, &start_arguments, &start_environment, Some(&sink), self.timeout())
                {
                    warn!("{service}: enable_start failed: {err}");
                }
            }

            let scripts = project.scripts(service, Where::Next)?;
            if !scripts.is_empty() {
                println!("- Scripts:");
            }

            for script in scripts {
                let mut sink = log.open(&format!("{service}/scripts.log"))?;
                let label = format!("(type:{}, shell:{})", script.script_type.as_str(), script.shell);

                print!("  - {label} ... ");
                std::io::stdout().flush().ok();
                writeln!(sink, "+ {label}: {}", script.text).ok();

                let status = driver.cmd(
                    &jail,
                    &script.text,
                    &script.shell,
                    script.script_type,
                    Some(&sink),
                    self.timeout(),
                )?;

                if status != 0 {
                    println!("{}", "FAIL!".red());
                    project.set_state(State::Failed)?;
                    project.set_fail(service)?;
                    return Err(DirectorError::ExternalStatus {
                        service: service.to_string(),
                        operation: "script".to_string(),
                        status,
                    }
                    .into());
                }
                println!("{}", "ok.".green());
            }
        }

        if driver.status(&jail)? != 0 {
            did_something = true;

            let sink = log.open(&format!("{service}/start.log"))?;
            println!("Starting {jail} ... ");
            let status = driver.start(&jail, Some(&sink), self.timeout())?;

            if status != 0 {
                project.set_state(State::Failed)?;
                project.set_fail(service)?;
                return Err(DirectorError::ExternalStatus {
                    service: service.to_string(),
                    operation: "start".to_string(),
                    status,
                }
                .into());
            }
        }

        project.set_done(service)?;
        signal_guard.set_current_jail(None);

        Ok(did_something)
    }

    pub fn down(
        &self,
        project_name: &str,
        destroy: bool,
        ignore_failed: bool,
        ignore_services: bool,
    ) -> Result<()> {
        let driver = self.driver();

        let project_dir = self.config.projects_dir.join(project_name);
        let director_file = project_dir.join(crate::constants::DIRECTOR_FILE);

        let spec_file: std::path::PathBuf = if director_file.is_file() {
            director_file
        } else {
            project_dir.join(crate::constants::DEFAULT_MAKEJAIL)
        };

        let project = Project::new(project_name, &spec_file, &self.config.projects_dir, Some(&self.config.locks_dir))?;
        project.acquire_lock()?;

        let result = self.down_inner(&project, &driver, destroy, ignore_failed, ignore_services, &project_dir);
        project.release_lock();
        result
    }

    fn down_inner(
        &self,
        project: &Project,
        driver: &JailDriver,
        destroy: bool,
        ignore_failed: bool,
        ignore_services: bool,
        project_dir: &Path,
    ) -> Result<()> {
        project.set_state(State::Destroying).ok();

        if !ignore_services {
            let mut services: Vec<String> = project.services(Where::Current).unwrap_or_default().into_iter().collect();
            services.sort_by_key(|service| std::cmp::Reverse(project.priority(service, Where::Current).unwrap_or(0)));

            for service in services {
                let Ok(Some(jail)) = project.get_jail_name(&service, Where::Current, false, true) else {
                    continue;
                };

                if driver.check(&jail).unwrap_or(1) != 0 {
                    continue;
                }

                let log = LogSink::new(&self.config.logs_dir);

                if driver.status(&jail).unwrap_or(1) == 0 {
                    let sink = log.open(&format!("{service}/stop.log"))?;
                    driver.stop(&jail, Some(&sink), self.timeout()).ok();
                }

                if destroy {
                    let sink = log.open(&format!("{service}/destroy.log"))?;
                    let status = driver.destroy(
                        &jail,
                        self.config.jails_remove_recursive,
                        self.config.jails_remove_force,
                        Some(&sink),
                        self.timeout(),
                    )?;

                    if status != 0 && !ignore_failed {
                        return Err(DirectorError::ExternalStatus {
                            service: service.clone(),
                            operation: "destroy".to_string(),
                            status,
                        }
                        .into());
                    }
                }
            }
        }

        if destroy {
            std::fs::remove_dir_all(project_dir).ok();
        }

        Ok(())
    }

    pub fn ls(&self, filter: StateFilter) -> Result<Vec<ProjectSummary>> {
        let mut summaries = Vec::new();

        let Ok(entries) = std::fs::read_dir(&self.config.projects_dir) else {
            return Ok(summaries);
        };

        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let project = Project::new(&name, Path::new(crate::constants::DIRECTOR_FILE), &self.config.projects_dir, None)?;
            let state = project.get_state().unwrap_or(None);

            if state_matches(filter, state) {
                summaries.push(ProjectSummary { name, state });
            }
        }

        Ok(summaries)
    }

    pub fn info(&self, project_name: &str) -> Result<ProjectInfo> {
        let driver = self.driver();
        let project = Project::new(
            project_name,
            Path::new(crate::constants::DIRECTOR_FILE),
            &self.config.projects_dir,
            Some(&self.config.locks_dir),
        )?;

        let state = project.get_state().unwrap_or(None);
        let last_log = project.get_key("last_log", None)?;
        let locked = self.config.locks_dir.join(project_name).join("lock").is_file()
            || project.directory().join("lock").is_file();

        let mut services = Vec::new();
        for service in project.services(Where::Current).unwrap_or_default() {
            let jail = project.get_jail_name(&service, Where::Current, false, true).unwrap_or(None);
            let status = match &jail {
                Some(jail) => driver.status(jail).unwrap_or(-1),
                None => -1,
            };
            services.push(ServiceStatus { name: service, jail, status });
        }
        services.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(ProjectInfo {
            name: project_name.to_string(),
            state,
            last_log,
            locked,
            services,
        })
    }

    pub fn check(&self, project_name: &str) -> Result<i32> {
        let exists = self.config.projects_dir.join(project_name).is_dir();
        Ok(if exists { 0 } else { EX_NOINPUT })
    }
}

fn state_matches(filter: StateFilter, state: Option<State>) -> bool {
    match (filter, state) {
        (StateFilter::All, _) => true,
        (StateFilter::Done, Some(State::Done)) => true,
        (StateFilter::Failed, Some(State::Failed)) => true,
        (StateFilter::Unfinished, Some(State::Unfinished)) => true,
        (StateFilter::Destroying, Some(State::Destroying)) => true,
        _ => false,
    }
}

pub fn state_symbol(state: Option<State>) -> char {
    match state {
        Some(State::Done) => '+',
        Some(State::Failed) => '-',
        Some(State::Unfinished) => '!',
        Some(State::Destroying) => 'x',
        None => '?',
    }
}
