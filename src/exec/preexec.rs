/// Child-side setup applied between fork and exec
///
/// Everything in `PreExec::apply` runs in the forked child via `pre_exec`,
/// so it must stick to async-signal-safe calls: raw rlimit/signal/setuid
/// syscalls on values resolved in the parent beforehand. Name lookups
/// (nobody/nogroup) happen in the parent for exactly that reason.
///
/// Fixed order: SIGPIPE reset -> RLIMIT_CPU -> RLIMIT_AS -> credential
/// drop. The working-directory change is handled by `Command::current_dir`.
use crate::config::types::ResourceLimits;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{signal, SigHandler, Signal};
use std::io;

/// Unprivileged identity to drop to, resolved in the parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DropTarget {
    pub uid: u32,
    pub gid: u32,
}

/// Resolve the nobody/nogroup identity when running privileged.
///
/// Returns `None` when the process is not root or the accounts are
/// missing: the drop is best-effort hardening, not a gate, so lookup
/// failures only warn.
pub fn resolve_drop_target() -> Option<DropTarget> {
    if !nix::unistd::geteuid().is_root() {
        return None;
    }
    let user = match nix::unistd::User::from_name("nobody") {
        Ok(Some(user)) => user,
        Ok(None) => {
            log::warn!("No 'nobody' account found; skipping privilege drop");
            return None;
        }
        Err(err) => {
            log::warn!("Failed to look up 'nobody': {}; skipping privilege drop", err);
            return None;
        }
    };
    let gid = match nix::unistd::Group::from_name("nogroup") {
        Ok(Some(group)) => group.gid.as_raw(),
        _ => user.gid.as_raw(),
    };
    Some(DropTarget {
        uid: user.uid.as_raw(),
        gid,
    })
}

/// The pre-exec program for one spawn.
#[derive(Clone, Debug)]
pub struct PreExec {
    cpu_time_seconds: Option<u64>,
    memory_bytes: Option<u64>,
    drop_target: Option<DropTarget>,
}

impl PreExec {
    pub fn new(limits: &ResourceLimits, drop_target: Option<DropTarget>) -> Self {
        Self {
            cpu_time_seconds: limits.cpu_time_seconds,
            memory_bytes: limits.memory_bytes,
            drop_target,
        }
    }

    /// Whether a credential drop is armed for the child; surfaced to
    /// callers as `privilege_dropped` in `RunResult.extra`.
    pub fn drops_privileges(&self) -> bool {
        self.drop_target.is_some()
    }

    /// Runs in the child. Limit failures abort the spawn; the credential
    /// drop is swallowed.
    pub fn apply(&self) -> io::Result<()> {
        // Broken pipes must kill the child with the default disposition,
        // not surface as exceptions inside user code.
        unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) }.map_err(io_err)?;

        if let Some(cpu) = self.cpu_time_seconds {
            // soft delivers SIGXCPU at the limit, hard kills one second later
            setrlimit(Resource::RLIMIT_CPU, cpu, cpu + 1).map_err(io_err)?;
        }
        if let Some(mem) = self.memory_bytes {
            setrlimit(Resource::RLIMIT_AS, mem, mem).map_err(io_err)?;
        }

        if let Some(target) = self.drop_target {
            // GID before UID; once the UID is gone the GID cannot change.
            // Failures are swallowed: without root these calls are no-ops.
            unsafe {
                let _ = libc::setgid(target.gid as libc::gid_t);
                let _ = libc::setuid(target.uid as libc::uid_t);
            }
        }

        Ok(())
    }
}

fn io_err(err: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}
