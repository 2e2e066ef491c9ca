//! Thin, testable wrapper around the external `appjail` tool.
//!
//! Every operation shells out to a single `appjail` subcommand and returns
//! its integer exit status (0 = success); none of them interpret failure
//! themselves, that's the Reconciler's job. Every spawned child is recorded
//! in a shared [`ProcessRegistry`] so [`crate::signal_guard::SignalGuard`]
//! can find and terminate it if the run is interrupted.

use std::collections::HashMap;
use std::fs::File;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use wait_timeout::ChildExt;

use crate::constants::APPJAIL_BIN;
use crate::errors::DirectorError;
use crate::spec::{OrderedPairs, ScriptType, VolumeDef};
use crate::sysexits::EX_SOFTWARE;

/// pid -> jail name the child is building, if any. A `None` jail means the
/// child isn't tied to a particular jail (e.g. `start`/`stop`/`destroy`).
pub type ProcessRegistry = Arc<Mutex<HashMap<u32, Option<String>>>>;

#[derive(Clone)]
pub struct JailDriver {
    appjail_bin: String,
    registry: ProcessRegistry,
}

impl JailDriver {
    pub fn new(registry: ProcessRegistry) -> Self {
        JailDriver {
            appjail_bin: APPJAIL_BIN.to_string(),
            registry,
        }
    }

    pub fn registry(&self) -> ProcessRegistry {
        Arc::clone(&self.registry)
    }

    pub fn check(&self, jail: &str) -> Result<i32> {
        self.run(
            &["jail".into(), "get".into(), "--".into(), jail.into(), "name".into()],
            None,
            None,
            None,
            None,
        )
    }

    pub fn status(&self, jail: &str) -> Result<i32> {
        self.run(&["status".into(), "-q".into(), "--".into(), jail.into()], None, None, None, None)
    }

    /// 0 running, 1 stopped, -1 indeterminate (no/garbled output).
    pub fn is_dirty(&self, jail: &str) -> Result<i32> {
        let output = Command::new(&self.appjail_bin)
            .args(["jail", "get", "--", jail, "dirty"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .context("failed to run appjail jail get dirty")?;

        let stdout = String::from_utf8_lossy(&output.stdout);

        match stdout.trim() {
            "0" => Ok(0),
            "1" => Ok(1),
            _ => Ok(-1),
        }
    }

    pub fn start(&self, jail: &str, sink: Option<&File>, timeout: Option<Duration>) -> Result<i32> {
        self.run(&["start".into(), "--".into(), jail.into()], sink, timeout, None, None)
    }

    pub fn stop(&self, jail: &str, sink: Option<&File>, timeout: Option<Duration>) -> Result<i32> {
        self.run(&["stop".into(), "--".into(), jail.into()], sink, timeout, None, None)
    }

    pub fn destroy(
        &self,
        jail: &str,
        recursive: bool,
        force: bool,
        sink: Option<&File>,
        timeout: Option<Duration>,
    ) -> Result<i32> {
        let mut args = vec!["jail".to_string(), "destroy".to_string()];

        if recursive {
            args.push("-R".into());
        }

        if force {
            args.push("-f".into());
        }

        args.push("--".into());
        args.push(jail.into());

        self.run(&args, sink, timeout, None, None)
    }

    pub fn cmd(
        &self,
        jail: &str,
        text: &str,
        shell: &str,
        script_type: ScriptType,
        sink: Option<&File>,
        timeout: Option<Duration>,
    ) -> Result<i32> {
        let mut args = vec![
            "cmd".to_string(),
            script_type.as_str().to_string(),
            jail.to_string(),
            "--".to_string(),
        ];

        args.extend(split_shell(shell));
        args.push(text.to_string());

        self.run(&args, sink, timeout, None, Some(jail))
    }

    pub fn enable_start(
        &self,
        jail: &str,
        arguments: &OrderedPairs,
        environment: &OrderedPairs,
        sink: Option<&File>,
        timeout: Option<Duration>,
    ) -> Result<i32> {
        let mut args = vec!["enable".to_string(), jail.to_string(), "start".to_string()];

        for (name, value) in arguments {
            args.push("-s".into());
            args.push(format!("{name}={}", value.clone().unwrap_or_default()));
        }

        for (name, value) in environment {
            args.push("-V".into());
            match value {
                Some(v) => args.push(format!("{name}={v}")),
                None => args.push(name.clone()),
            }
        }

        self.run(&args, sink, timeout, None, Some(jail))
    }

    /// Build this jail from a Makejail. `volumes` is the service's ordered
    /// `(volume-name, mountpoint)` pairs; `volume_defs` is the document's
    /// `volumes:` table.
    #[allow(clippy::too_many_arguments)]
    pub fn makejail(
        &self,
        jail: &str,
        makejail_file: &str,
        arguments: &OrderedPairs,
        environment: &OrderedPairs,
        volumes: &OrderedPairs,
        volume_defs: &HashMap<String, VolumeDef>,
        options: &OrderedPairs,
        default_volume_type: &str,
        sink: Option<&File>,
        timeout: Option<Duration>,
    ) -> Result<i32> {
        let mut args = vec![
            "makejail".to_string(),
            "-j".to_string(),
            jail.to_string(),
            "-f".to_string(),
            makejail_file.to_string(),
        ];

        for (name, value) in environment {
            args.push("-V".into());
            match value {
                Some(v) => args.push(format!("{name}={v}")),
                None => args.push(name.clone()),
            }
        }

        for (name, mountpoint) in volumes {
            let mountpoint = mountpoint
                .clone()
                .ok_or_else(|| DirectorError::InvalidSpec(format!("{name}: volume mountpoint required")))?;
            let volume = volume_defs
                .get(name)
                .ok_or_else(|| DirectorError::VolumeNotFound(name.clone()))?;

            args.push("-o".into());
            args.push(format_fstab_option(volume, &mountpoint, default_volume_type)?);
        }

        for (name, value) in options {
            args.push("-o".into());
            match value {
                Some(v) => args.push(format!("{name}={v}")),
                None => args.push(name.clone()),
            }
        }

        if !arguments.is_empty() {
            args.push("--".into());
        }

        for (name, value) in arguments {
            match value {
                Some(v) => {
                    args.push(format!("--{name}"));
                    args.push(v.clone());
                }
                None => args.push(format!("--{name}")),
            }
        }

        let mut env = HashMap::new();
        for (key, value) in std::env::vars() {
            env.insert(key, value);
        }
        env.insert("GIT_ASKPASS".to_string(), "true".to_string());

        self.run(&args, sink, timeout, Some(&env), Some(jail))
    }

    fn run(
        &self,
        args: &[String],
        sink: Option<&File>,
        timeout: Option<Duration>,
        env: Option<&HashMap<String, String>>,
        jail: Option<&str>,
    ) -> Result<i32> {
        let mut child = self.spawn(args, sink, env, jail)?;
        let pid = child.id();

        let status = match timeout {
            Some(timeout) => match child
                .wait_timeout(timeout)
                .context("failed waiting for appjail child")?
            {
                Some(status) => Some(status),
                None => {
                    self.terminate(pid).ok();
                    child.wait().ok()
                }
            },
            None => Some(child.wait().context("failed waiting for appjail child")?),
        };

        self.registry.lock().unwrap().remove(&pid);

        Ok(status.and_then(|s| s.code()).unwrap_or(EX_SOFTWARE))
    }

    fn spawn(
        &self,
        args: &[String],
        sink: Option<&File>,
        env: Option<&HashMap<String, String>>,
        jail: Option<&str>,
    ) -> Result<Child> {
        let mut command = Command::new(&self.appjail_bin);
        command.args(args);
        command.stdin(Stdio::null());
        command.stdout(stdio_for(sink)?);
        command.stderr(stdio_for(sink)?);

        if let Some(env) = env {
            command.env_clear();
            command.envs(env);
        }

        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn {} {:?}", self.appjail_bin, args))?;

        self.registry
            .lock()
            .unwrap()
            .insert(child.id(), jail.map(str::to_string));

        Ok(child)
    }

    /// Graceful termination via appjail's own kill path, not a direct signal.
    pub fn terminate(&self, pid: u32) -> Result<i32> {
        let status = Command::new(&self.appjail_bin)
            .args(["cmd", "jaildir", "kill", "--", &pid.to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .context("failed to run appjail cmd jaildir kill")?;

        Ok(status.code().unwrap_or(-1))
    }
}

fn stdio_for(sink: Option<&File>) -> Result<Stdio> {
    match sink {
        Some(file) => Ok(Stdio::from(file.try_clone().context("failed to duplicate log handle")?)),
        None => Ok(Stdio::null()),
    }
}

/// A minimal whitespace/quote-aware split, enough for the `/bin/sh -c`
/// style values this field holds in practice.
fn split_shell(shell: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quote_char = ' ';

    for c in shell.chars() {
        if in_quotes {
            if c == quote_char {
                in_quotes = false;
            } else {
                current.push(c);
            }
        } else if c == '\'' || c == '"' {
            in_quotes = true;
            quote_char = c;
        } else if c.is_whitespace() {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

fn format_fstab_option(volume: &VolumeDef, mountpoint: &str, default_volume_type: &str) -> Result<String> {
    let volume_type = if volume.volume_type.is_empty() {
        default_volume_type
    } else {
        &volume.volume_type
    };

    let mut device = volume.device.clone();

    if volume_type == "nullfs" || volume_type == "<pseudofs>" {
        device = prepare_device(volume, &device)?;
    }

    let escape = |s: &str| s.replace('"', "\\\"");

    Ok(format!(
        "fstab=\"{}\" \"{}\" \"{}\" \"{}\" {} {}",
        escape(&device),
        escape(mountpoint),
        escape(volume_type),
        escape(&volume.options),
        volume.dump,
        volume.pass
    ))
}

/// Create the device directory if missing, applying the volume's umask,
/// mode and owner/group, then resolve it to its canonical path.
fn prepare_device(volume: &VolumeDef, device: &str) -> Result<String> {
    use std::path::Path;

    let path = Path::new(device);

    let old_umask = volume
        .umask
        .as_ref()
        .and_then(|u| u.parse::<u32>().ok())
        .map(|mask| {
            // SAFETY: umask(2) is async-signal-safe and process-global;
            // we restore it immediately after creating the directory.
            unsafe { libc::umask(mask as libc::mode_t) }
        });

    if !path.exists() {
        std::fs::create_dir_all(path).with_context(|| format!("failed to create {device}"))?;
    }

    if let Some(old) = old_umask {
        // SAFETY: see above.
        unsafe {
            libc::umask(old);
        }
    }

    if let Some(mode) = volume.mode.as_ref().and_then(|m| u32::from_str_radix(m, 8).ok().or_else(|| m.parse().ok()))
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .with_context(|| format!("failed to chmod {device}"))?;
    }

    if volume.owner.is_some() || volume.group.is_some() {
        chown_path(path, volume.owner.as_deref(), volume.group.as_deref())?;
    }

    std::fs::canonicalize(path)
        .map(|p| p.to_string_lossy().into_owned())
        .with_context(|| format!("failed to resolve {device}"))
}

fn chown_path(path: &std::path::Path, owner: Option<&str>, group: Option<&str>) -> Result<()> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .context("device path contains a NUL byte")?;

    let uid = owner.map(resolve_uid).transpose()?.unwrap_or(u32::MAX);
    let gid = group.map(resolve_gid).transpose()?.unwrap_or(u32::MAX);

    // SAFETY: c_path is a valid, NUL-terminated C string for the lifetime
    // of this call; -1 (u32::MAX as libc::uid_t/gid_t) means "don't change".
    let rc = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };

    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("chown failed");
    }

    Ok(())
}

fn resolve_uid(owner: &str) -> Result<u32> {
    owner.parse().or_else(|_| anyhow::bail!("symbolic owner names are not supported: {owner}"))
}

fn resolve_gid(group: &str) -> Result<u32> {
    group.parse().or_else(|_| anyhow::bail!("symbolic group names are not supported: {group}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_shell_handles_default_shell() {
        assert_eq!(split_shell("/bin/sh -c"), vec!["/bin/sh", "-c"]);
    }

    #[test]
    fn split_shell_respects_quotes() {
        assert_eq!(split_shell(r#"/bin/sh -c "extra arg""#), vec!["/bin/sh", "-c", "extra arg"]);
    }

    #[test]
    fn format_fstab_option_escapes_quotes() {
        let volume = VolumeDef {
            device: "/tank/\"quoted\"".to_string(),
            volume_type: "zfs".to_string(),
            options: "rw".to_string(),
            dump: 0,
            pass: 0,
            umask: None,
            mode: None,
            owner: None,
            group: None,
        };

        let option = format_fstab_option(&volume, "/jail/data", "nullfs").unwrap();
        assert!(option.contains(r#"\"quoted\""#));
        assert!(option.starts_with("fstab=\"/tank/"));
    }
}
