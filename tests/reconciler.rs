//! Integration tests driving the full `up` reconciliation loop against a
//! scripted fake `appjail`, reached through an overridden `PATH`.
//!
//! All tests share one process (a single test binary), so they're run
//! serially under `ENV_LOCK` to avoid racing on the process-wide `PATH` and
//! current directory that `Reconciler::up` mutates.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Mutex;

use director::config::Config;
use director::errors::DirectorError;
use director::reconciler::Reconciler;

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// A POSIX-shell `appjail` stand-in. Every invocation is appended to
/// `$DIRECTOR_TEST_STATE/calls.log`; jail existence/running state is tracked
/// with marker files under the same directory so repeated `up` runs can be
/// told apart from a first one.
const FAKE_APPJAIL: &str = r#"#!/bin/sh
set -u
STATE="$DIRECTOR_TEST_STATE"
echo "$*" >> "$STATE/calls.log"

case "$1" in
  jail)
    case "$2" in
      get)
        jail="$4"
        field="$5"
        if [ "$field" = "dirty" ]; then
          echo "0"
          exit 0
        fi
        [ -f "$STATE/$jail.created" ] && exit 0 || exit 1
        ;;
      destroy)
        shift 2
        while [ "$1" != "--" ]; do shift; done
        shift
        jail="$1"
        rm -f "$STATE/$jail.created" "$STATE/$jail.started"
        exit 0
        ;;
    esac
    ;;
  status)
    jail="$4"
    [ -f "$STATE/$jail.started" ] && exit 0 || exit 1
    ;;
  start)
    jail="$3"
    touch "$STATE/$jail.started"
    exit 0
    ;;
  stop)
    jail="$3"
    rm -f "$STATE/$jail.started"
    exit 0
    ;;
  makejail)
    jail="$3"
    if [ -f "$STATE/makejail_fail_$jail" ]; then
      exit "$(cat "$STATE/makejail_fail_$jail")"
    fi
    touch "$STATE/$jail.created"
    exit 0
    ;;
  cmd)
    jail="$3"
    if [ -f "$STATE/script_fail_$jail" ]; then
      exit "$(cat "$STATE/script_fail_$jail")"
    fi
    exit 0
    ;;
  enable)
    exit 0
    ;;
esac
exit 0
"#;

struct Harness {
    _root: tempfile::TempDir,
    state: PathBuf,
    spec_dir: PathBuf,
    config: Config,
    original_path: String,
    original_dir: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let bin_dir = root.path().join("bin");
        fs::create_dir_all(&bin_dir).unwrap();

        let script_path = bin_dir.join("appjail");
        fs::write(&script_path, FAKE_APPJAIL).unwrap();
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755)).unwrap();

        let state = root.path().join("state");
        fs::create_dir_all(&state).unwrap();

        let spec_dir = root.path().join("spec");
        fs::create_dir_all(&spec_dir).unwrap();

        let config = Config {
            logs_dir: root.path().join("logs"),
            projects_dir: root.path().join("projects"),
            locks_dir: root.path().join("locks"),
            jails_remove_recursive: false,
            jails_remove_force: true,
            commands_timeout: 5,
        };

        let original_path = std::env::var("PATH").unwrap_or_default();
        let original_dir = std::env::current_dir().unwrap();

        unsafe {
            std::env::set_var("PATH", format!("{}:{original_path}", bin_dir.display()));
            std::env::set_var("DIRECTOR_TEST_STATE", &state);
        }

        Harness { _root: root, state, spec_dir, config, original_path, original_dir }
    }

    fn write_spec(&self, contents: &str) -> PathBuf {
        let path = self.spec_dir.join("appjail-director.yml");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "{contents}").unwrap();
        path
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.state.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn jail_name(&self, project: &str, service: &str) -> String {
        let path = self.config.projects_dir.join(project).join(format!("{service}/name"));
        fs::read_to_string(path).unwrap().trim().to_string()
    }

    fn project_state(&self, project: &str) -> String {
        let path = self.config.projects_dir.join(project).join("state");
        fs::read_to_string(path).unwrap().trim().to_string()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        unsafe {
            std::env::set_var("PATH", &self.original_path);
            std::env::remove_var("DIRECTOR_TEST_STATE");
        }
        std::env::set_current_dir(&self.original_dir).ok();
    }
}

fn line_matching(calls: &[String], needle: &str) -> Option<usize> {
    calls.iter().position(|line| line.contains(needle))
}

#[test]
fn minimal_up_creates_and_starts_a_single_service() {
    let _guard = ENV_LOCK.lock().unwrap();
    let harness = Harness::new();

    let spec_file = harness.write_spec(
        r#"
services:
  web:
    scripts: []
"#,
    );

    let reconciler = Reconciler::new(harness.config.clone());
    reconciler.up(&spec_file, "demo", false).unwrap();

    assert_eq!(harness.project_state("demo"), "done");

    let jail = harness.jail_name("demo", "web");
    let calls = harness.calls();

    let check = line_matching(&calls, &format!("jail get -- {jail} name")).expect("check call");
    let makejail = line_matching(&calls, &format!("makejail -j {jail}")).expect("makejail call");
    let status = line_matching(&calls, &format!("status -q -- {jail}")).expect("status call");
    let start = line_matching(&calls, &format!("start -- {jail}")).expect("start call");

    assert!(check < makejail);
    assert!(makejail < status);
    assert!(status < start);
}

#[test]
fn unchanged_spec_is_idempotent_on_second_run() {
    let _guard = ENV_LOCK.lock().unwrap();
    let harness = Harness::new();

    let spec_file = harness.write_spec(
        r#"
services:
  web:
    scripts: []
"#,
    );

    let reconciler = Reconciler::new(harness.config.clone());
    reconciler.up(&spec_file, "demo", false).unwrap();
    let calls_after_first = harness.calls().len();

    reconciler.up(&spec_file, "demo", false).unwrap();
    let calls = harness.calls();
    let new_calls = &calls[calls_after_first..];

    assert!(
        new_calls.iter().all(|line| !line.starts_with("makejail") && !line.starts_with("start")),
        "second run should not rebuild or restart anything, saw: {new_calls:?}"
    );
    assert_eq!(harness.project_state("demo"), "done");
}

#[test]
fn services_are_created_in_ascending_priority_order() {
    let _guard = ENV_LOCK.lock().unwrap();
    let harness = Harness::new();

    let spec_file = harness.write_spec(
        r#"
services:
  app:
    priority: 10
    scripts: []
  db:
    priority: 1
    scripts: []
  cache:
    priority: 5
    scripts: []
"#,
    );

    let reconciler = Reconciler::new(harness.config.clone());
    reconciler.up(&spec_file, "demo", false).unwrap();

    let calls = harness.calls();
    let db = harness.jail_name("demo", "db");
    let cache = harness.jail_name("demo", "cache");
    let app = harness.jail_name("demo", "app");

    let db_makejail = line_matching(&calls, &format!("makejail -j {db}")).expect("db makejail");
    let cache_makejail = line_matching(&calls, &format!("makejail -j {cache}")).expect("cache makejail");
    let app_makejail = line_matching(&calls, &format!("makejail -j {app}")).expect("app makejail");

    assert!(db_makejail < cache_makejail);
    assert!(cache_makejail < app_makejail);
}

#[test]
fn removed_service_is_destroyed_and_forgotten() {
    let _guard = ENV_LOCK.lock().unwrap();
    let harness = Harness::new();

    let spec_file = harness.write_spec(
        r#"
services:
  a:
    scripts: []
  b:
    scripts: []
"#,
    );

    let reconciler = Reconciler::new(harness.config.clone());
    reconciler.up(&spec_file, "demo", false).unwrap();

    let b_jail = harness.jail_name("demo", "b");
    let b_name_key = harness.config.projects_dir.join("demo").join("b/name");
    assert!(b_name_key.is_file());

    harness.write_spec(
        r#"
services:
  a:
    scripts: []
"#,
    );

    reconciler.up(&spec_file, "demo", false).unwrap();

    let calls = harness.calls();
    let stop = line_matching(&calls, &format!("stop -- {b_jail}"));
    let destroy = line_matching(&calls, &format!("jail destroy -f -- {b_jail}"));
    assert!(destroy.is_some(), "expected b to be destroyed, saw: {calls:?}");
    if let Some(stop) = stop {
        assert!(stop < destroy.unwrap());
    }

    assert!(!b_name_key.exists(), "b's keys should be forgotten once it's removed from the spec");
}

#[test]
fn makejail_failure_marks_the_service_failed() {
    let _guard = ENV_LOCK.lock().unwrap();
    let harness = Harness::new();

    // An explicit `name:` makes the jail name deterministic, so the fake
    // script's failure marker can be keyed on it ahead of time.
    let spec_file = harness.write_spec(
        r#"
services:
  app:
    name: app-jail
    scripts: []
"#,
    );

    fs::write(harness.state.join("makejail_fail_app-jail"), "7").unwrap();

    let reconciler = Reconciler::new(harness.config.clone());
    let err = reconciler.up(&spec_file, "demo-fail", false).expect_err("a failing makejail should surface as an error");

    let code = err
        .downcast_ref::<DirectorError>()
        .map(DirectorError::exit_code)
        .expect("error should be a DirectorError carrying the tool's exit status");
    assert_eq!(code, 7, "the process should exit with the tool's own status");

    let fail_key = harness.config.projects_dir.join("demo-fail").join("app/fail");
    assert!(fail_key.is_file());
    assert_eq!(harness.project_state("demo-fail"), "failed");
}
