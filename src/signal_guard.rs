//! Signal-safe cleanup for an in-flight `up`/`down` run.
//!
//! Informational signals are drained on a background thread so stray
//! `SIGUSR1`/`SIGALRM`/etc. from ambient system activity can't interrupt a
//! run. Termination signals are handled once: the handler thread stops the
//! jail currently being built (if any), terminates every child tracked by
//! the [`JailDriver`]'s process registry, then exits the process — so it
//! never re-enters, which is what the disables-itself requirement amounts
//! to outside of a true POSIX signal handler.

use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Result;
use signal_hook::consts::{SIGALRM, SIGHUP, SIGINT, SIGPROF, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2, SIGVTALRM, SIGXCPU, SIGXFSZ};
use signal_hook::iterator::Signals;

use crate::jail_driver::JailDriver;
use crate::sysexits::EX_SOFTWARE;

const INFORMATIONAL: &[i32] = &[SIGALRM, SIGVTALRM, SIGPROF, SIGUSR1, SIGUSR2];
const TERMINATION: &[i32] = &[SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGXCPU, SIGXFSZ];

pub struct SignalGuard {
    current_jail: Arc<Mutex<Option<String>>>,
}

impl SignalGuard {
    /// Spawn the two background listener threads. The returned guard is
    /// how the Reconciler tells the termination handler which jail is
    /// currently being built.
    pub fn install(driver: JailDriver) -> Result<Self> {
        let mut informational = Signals::new(INFORMATIONAL)?;
        thread::spawn(move || {
            for _ in informational.forever() {
                // Deliberately ignored.
            }
        });

        let current_jail = Arc::new(Mutex::new(None));
        let current_jail_for_handler = Arc::clone(&current_jail);

        let mut termination = Signals::new(TERMINATION)?;
        thread::spawn(move || {
            if termination.forever().next().is_some() {
                handle_termination(&driver, &current_jail_for_handler);
            }
        });

        Ok(SignalGuard { current_jail })
    }

    pub fn set_current_jail(&self, jail: Option<String>) {
        *self.current_jail.lock().unwrap() = jail;
    }
}

fn handle_termination(driver: &JailDriver, current_jail: &Arc<Mutex<Option<String>>>) {
    if let Some(jail) = current_jail.lock().unwrap().clone()
        && driver.status(&jail).unwrap_or(1) == 0
    {
        driver.stop(&jail, None, None).ok();
    }

    let pids: Vec<u32> = driver.registry().lock().unwrap().keys().copied().collect();

    for pid in pids {
        driver.terminate(pid).ok();
    }

    std::process::exit(EX_SOFTWARE);
}
