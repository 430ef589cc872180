//! Best-effort process tuning applied for the duration of a run.
//!
//! On Unix the soft open-file limit is raised to the hard limit so tens of
//! thousands of sockets can be open at once, and restored afterwards. Nothing
//! here is required for correctness; failures are logged and ignored.

use tracing::{debug, info, warn};

pub struct PerfHint {
    #[cfg(unix)]
    previous_nofile: Option<libc::rlimit>,
    active: bool,
}

impl PerfHint {
    /// A hint that changes nothing.
    pub fn none() -> Self {
        Self {
            #[cfg(unix)]
            previous_nofile: None,
            active: false,
        }
    }

    #[cfg(unix)]
    pub fn apply() -> Self {
        let Some(current) = read_nofile() else {
            return Self::none();
        };
        if current.rlim_cur >= current.rlim_max {
            debug!(limit = current.rlim_cur, "Open file limit already at maximum");
            return Self::none();
        }

        let raised = libc::rlimit {
            rlim_cur: current.rlim_max,
            rlim_max: current.rlim_max,
        };
        if !write_nofile(&raised) {
            return Self::none();
        }

        info!(
            from = current.rlim_cur,
            to = raised.rlim_cur,
            "Raised open file limit for the run"
        );
        Self {
            previous_nofile: Some(current),
            active: true,
        }
    }

    #[cfg(not(unix))]
    pub fn apply() -> Self {
        debug!("No performance hints available on this platform");
        Self::none()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Undo whatever `apply` changed. Safe to call more than once.
    pub fn revert(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        #[cfg(unix)]
        if let Some(previous) = self.previous_nofile.take() {
            if write_nofile(&previous) {
                debug!(limit = previous.rlim_cur, "Restored open file limit");
            }
        }
    }
}

impl Drop for PerfHint {
    fn drop(&mut self) {
        self.revert();
    }
}

#[cfg(unix)]
fn read_nofile() -> Option<libc::rlimit> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into the struct we pass.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if rc != 0 {
        warn!(
            "Could not read open file limit: {}",
            std::io::Error::last_os_error()
        );
        return None;
    }
    Some(limit)
}

#[cfg(unix)]
fn write_nofile(limit: &libc::rlimit) -> bool {
    // SAFETY: setrlimit only reads the struct we pass.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, limit) };
    if rc != 0 {
        warn!(
            "Could not change open file limit: {}",
            std::io::Error::last_os_error()
        );
        return false;
    }
    true
}
