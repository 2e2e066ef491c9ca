//! A single project: its on-disk state, its current/next specs, and the
//! comparisons the Reconciler needs between them.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::Result;
use indexmap::IndexSet;

use crate::constants::DIRECTOR_FILE;
use crate::errors::DirectorError;
use crate::keystore::KeyStore;
use crate::random_name;
use crate::spec::{self, OrderedPairs, ScriptDef, Specification, VolumeDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Done,
    Failed,
    Unfinished,
    Destroying,
}

impl State {
    fn as_str(self) -> &'static str {
        match self {
            State::Done => "done",
            State::Failed => "failed",
            State::Unfinished => "unfinished",
            State::Destroying => "destroying",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "done" => Some(State::Done),
            "failed" => Some(State::Failed),
            "unfinished" => Some(State::Unfinished),
            "destroying" => Some(State::Destroying),
            _ => None,
        }
    }
}

/// Which spec an accessor reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Where {
    Next,
    Current,
    Both,
}

pub struct Project {
    name: String,
    directory: PathBuf,
    current_file: PathBuf,
    next_file: PathBuf,
    store: KeyStore,
    lock_store: KeyStore,
    current_spec: RefCell<Option<Specification>>,
    next_spec: RefCell<Option<Specification>>,
    new_project: RefCell<Option<bool>>,
}

impl Project {
    /// `locks_dir`, when given, holds the `lock` key outside the project
    /// directory (so a lock survives `down --destroy` removing it).
    pub fn new(
        name: &str,
        next_file: &Path,
        projects_dir: &Path,
        locks_dir: Option<&Path>,
    ) -> Result<Self> {
        if !spec::is_valid_name(name) {
            return Err(DirectorError::InvalidProjectName(name.to_string()).into());
        }

        let directory = projects_dir.join(name);
        let current_file = directory.join(DIRECTOR_FILE);

        let lock_store = match locks_dir {
            Some(dir) => KeyStore::new(dir.join(name)),
            None => KeyStore::new(&directory),
        };

        let store = KeyStore::new(&directory);

        Ok(Project {
            name: name.to_string(),
            directory,
            current_file,
            next_file: next_file.to_path_buf(),
            store,
            lock_store,
            current_spec: RefCell::new(None),
            next_spec: RefCell::new(None),
            new_project: RefCell::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_new(&self) -> Option<bool> {
        *self.new_project.borrow()
    }

    /// Acquire the lock, parse both specs, and swap next into current on
    /// disk. On any failure the lock is released before the error escapes.
    pub fn open(&self) -> Result<()> {
        self.lock()?;

        match self.open_inner() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.unlock();
                Err(err)
            }
        }
    }

    fn open_inner(&self) -> Result<()> {
        self.parse_next_spec()?;
        self.parse_current_spec()?;

        let is_new = !self.current_file.is_file();
        *self.new_project.borrow_mut() = Some(is_new);

        if self.current_file.is_file() {
            fs::remove_file(&self.current_file)?;
        }

        if let Some(parent) = self.current_file.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::copy(&self.next_file, &self.current_file)?;

        let mut perms = fs::metadata(&self.current_file)?.permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(0o440);
        }
        fs::set_permissions(&self.current_file, perms)?;

        Ok(())
    }

    pub fn close(&self) {
        self.unlock();
    }

    /// Acquire the project lock without the `open()` current/next spec
    /// swap, for callers (`down`) that only need mutual exclusion.
    pub fn acquire_lock(&self) -> Result<()> {
        self.lock()
    }

    pub fn release_lock(&self) {
        self.unlock();
    }

    fn lock(&self) -> Result<()> {
        if self.lock_store.has("lock") {
            return Err(DirectorError::ProjectLocked(self.name.clone()).into());
        }

        self.lock_store.set("lock", "")?;
        Ok(())
    }

    fn unlock(&self) {
        self.lock_store.unset("lock").ok();
    }

    fn parse_next_spec(&self) -> Result<()> {
        if self.next_spec.borrow().is_some() {
            return Ok(());
        }

        let parsed = spec::load(&self.next_file)?;
        *self.next_spec.borrow_mut() = Some(parsed);
        Ok(())
    }

    fn parse_current_spec(&self) -> Result<()> {
        if self.current_spec.borrow().is_some() {
            return Ok(());
        }

        if self.current_file.is_file() {
            let parsed = spec::load(&self.current_file)?;
            *self.current_spec.borrow_mut() = Some(parsed);
        } else {
            self.parse_next_spec()?;
            let next = self.next_spec.borrow().clone().unwrap();
            *self.current_spec.borrow_mut() = Some(next);
        }

        Ok(())
    }

    fn spec(&self, where_: Where) -> Result<Specification> {
        match where_ {
            Where::Next | Where::Both => {
                self.parse_next_spec()?;
                Ok(self.next_spec.borrow().clone().unwrap())
            }
            Where::Current => {
                self.parse_current_spec()?;
                Ok(self.current_spec.borrow().clone().unwrap())
            }
        }
    }

    /// Service names in document order (the tie-breaker for same-priority
    /// services, spec §5); membership/removal comparisons on the result
    /// don't care about that order.
    pub fn services(&self, where_: Where) -> Result<IndexSet<String>> {
        Ok(self.spec(where_)?.services.keys().cloned().collect())
    }

    pub fn removed_services(&self) -> Result<IndexSet<String>> {
        let current = self.services(Where::Current)?;
        let next = self.services(Where::Next)?;
        Ok(current.difference(&next).cloned().collect())
    }

    pub fn set_state(&self, state: State) -> Result<()> {
        self.store.set("state", state.as_str())
    }

    pub fn get_state(&self) -> Result<Option<State>> {
        Ok(self.store.get("state", None)?.and_then(|s| State::parse(&s)))
    }

    pub fn has_failed(&self, service: &str) -> bool {
        self.store.has(&format!("{service}/fail"))
    }

    /// Remove every persisted key under `<service>/` (name, fail,
    /// makejail_mtime), used once a service has been torn down and no
    /// longer appears in the next spec.
    pub fn forget_service(&self, service: &str) -> Result<()> {
        self.store.unset(service)
    }

    pub fn set_fail(&self, service: &str) -> Result<()> {
        self.store.set(&format!("{service}/fail"), "")
    }

    pub fn set_done(&self, service: &str) -> Result<()> {
        self.store.unset(&format!("{service}/fail"))
    }

    pub fn set_key(&self, key: &str, value: &str) -> Result<()> {
        self.store.set(key, value)
    }

    pub fn get_key(&self, key: &str, default: Option<&str>) -> Result<Option<String>> {
        self.store.get(key, default)
    }

    /// Resolution order: requested spec(s), then the cached `<service>/name`
    /// key or the spec's explicit name, then (if `random_name`) a freshly
    /// generated one. The resolved value is persisted back.
    pub fn get_jail_name(
        &self,
        service_name: &str,
        where_: Where,
        random_name: bool,
        cached: bool,
    ) -> Result<Option<String>> {
        let mut service = None;

        if where_ == Where::Both || where_ == Where::Next {
            service = self.spec(Where::Next)?.services.get(service_name).cloned();
        }

        if service.is_none() && (where_ == Where::Both || where_ == Where::Current) {
            service = self.spec(Where::Current)?.services.get(service_name).cloned();
        }

        let service = service.ok_or_else(|| DirectorError::ServiceNotFound(service_name.to_string()))?;

        let key = format!("{service_name}/name");

        let jail = if cached {
            self.store.get(&key, service.name.as_deref())?
        } else {
            service.name.clone()
        };

        let jail = match jail {
            Some(jail) => jail,
            None => {
                if !random_name {
                    return Ok(None);
                }
                random_name::generate()
            }
        };

        self.store.set(&key, &jail)?;
        Ok(Some(jail))
    }

    /// Always `true` for a new project (or when newness is undetermined).
    pub fn differ(&self, service: &str) -> Result<bool> {
        if self.new_project.borrow().unwrap_or(true) {
            return Ok(true);
        }

        self.parse_current_spec()?;
        self.parse_next_spec()?;

        let current = self.current_spec.borrow();
        let next = self.next_spec.borrow();

        let current_service = current.as_ref().and_then(|s| s.services.get(service));
        let next_service = next.as_ref().and_then(|s| s.services.get(service));

        match (current_service, next_service) {
            (Some(a), Some(b)) => Ok(a != b),
            _ => Ok(true),
        }
    }

    pub fn differ_options(&self) -> Result<bool> {
        if self.new_project.borrow().unwrap_or(true) {
            return Ok(true);
        }

        self.parse_current_spec()?;
        self.parse_next_spec()?;

        let current = self.current_spec.borrow().clone().unwrap();
        let next = self.next_spec.borrow().clone().unwrap();

        Ok(current.options != next.options)
    }

    pub fn default_volume_type(&self, where_: Where) -> Result<Option<String>> {
        Ok(self.spec(where_)?.default_volume_type)
    }

    pub fn options(&self, where_: Where) -> Result<OrderedPairs> {
        Ok(self.spec(where_)?.options)
    }

    pub fn volumes(&self, where_: Where) -> Result<std::collections::HashMap<String, VolumeDef>> {
        Ok(self.spec(where_)?.volumes)
    }

    fn service(&self, service: &str, where_: Where) -> Result<crate::spec::ServiceDef> {
        self.spec(where_)?
            .services
            .get(service)
            .cloned()
            .ok_or_else(|| DirectorError::ServiceNotFound(service.to_string()).into())
    }

    pub fn priority(&self, service: &str, where_: Where) -> Result<i64> {
        Ok(self.service(service, where_)?.priority)
    }

    pub fn reset_options(&self, service: &str, where_: Where) -> Result<bool> {
        Ok(self.service(service, where_)?.reset_options)
    }

    pub fn ignore_mtime(&self, service: &str, where_: Where) -> Result<bool> {
        Ok(self.service(service, where_)?.ignore_mtime)
    }

    pub fn local_options(&self, service: &str, where_: Where) -> Result<OrderedPairs> {
        Ok(self.service(service, where_)?.options)
    }

    pub fn arguments(&self, service: &str, where_: Where) -> Result<OrderedPairs> {
        Ok(self.service(service, where_)?.arguments)
    }

    pub fn environment(&self, service: &str, where_: Where) -> Result<OrderedPairs> {
        Ok(self.service(service, where_)?.environment)
    }

    pub fn start_environment(&self, service: &str, where_: Where) -> Result<OrderedPairs> {
        Ok(self.service(service, where_)?.start_environment)
    }

    pub fn makejail_path(&self, service: &str, where_: Where) -> Result<String> {
        Ok(self.service(service, where_)?.makejail)
    }

    pub fn start_arguments(&self, service: &str, where_: Where) -> Result<OrderedPairs> {
        Ok(self.service(service, where_)?.start)
    }

    pub fn scripts(&self, service: &str, where_: Where) -> Result<Vec<ScriptDef>> {
        Ok(self.service(service, where_)?.scripts)
    }

    pub fn jail_volumes(&self, service: &str, where_: Where) -> Result<OrderedPairs> {
        Ok(self.service(service, where_)?.volumes)
    }

    pub fn set_makejail_mtime(&self, service: &str) -> Result<()> {
        let mtime = self.makejail_mtime_on_disk(service)?;
        self.store.set(&format!("{service}/makejail_mtime"), &mtime.to_string())
    }

    /// True iff the stored mtime predates the file's current mtime (or the
    /// Makejail is absent, in which case its mtime is treated as 0).
    pub fn check_makejail_mtime(&self, service: &str) -> Result<bool> {
        let key_mtime: f64 = self
            .store
            .get(&format!("{service}/makejail_mtime"), Some("0"))?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);

        let file_mtime = self.makejail_mtime_on_disk(service)?;

        Ok(key_mtime < file_mtime)
    }

    /// Modification time (as seconds since the epoch) of the next spec's
    /// Makejail for `service`, resolved relative to the spec's directory;
    /// 0 if the file doesn't exist.
    fn makejail_mtime_on_disk(&self, service: &str) -> Result<f64> {
        let makejail = self.makejail_path(service, Where::Next)?;
        let path = Path::new(&makejail);

        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.next_file
                .parent()
                .map(|dir| dir.join(path))
                .unwrap_or_else(|| path.to_path_buf())
        };

        match fs::metadata(&resolved).and_then(|m| m.modified()) {
            Ok(modified) => Ok(modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0)),
            Err(_) => Ok(0.0),
        }
    }
}
