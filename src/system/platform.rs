// src/system/platform.rs

//! Host-specific pieces: platform detection, access to native process ids and the decoding of
//! exit statuses. Everything that differs between POSIX and other hosts is kept here.

use crate::system::errors::RunnerError;
use std::env;
use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Host operating system family.
pub enum Platform {
    Linux,
    Windows,
    MacOs,
    Solaris,
    FreeBsd,
    /// Any other host; its name is the `std::env::consts::OS` value.
    Other(&'static str),
}

impl Platform {
    /// The platform this binary was compiled for.
    pub fn current() -> Self {
        Self::from_os_name(std::env::consts::OS)
    }

    /// Maps a `std::env::consts::OS` value.
    pub fn from_os_name(os: &'static str) -> Self {
        match os {
            "linux" => Self::Linux,
            "windows" => Self::Windows,
            "macos" => Self::MacOs,
            "solaris" | "illumos" => Self::Solaris,
            "freebsd" => Self::FreeBsd,
            other => Self::Other(other),
        }
    }

    /// Whether signals can be delivered with the `kill` utility.
    pub fn is_unix_like(&self) -> bool {
        match self {
            Self::Windows => false,
            Self::Other(_) => cfg!(unix),
            _ => true,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => f.write_str("Linux"),
            Self::Windows => f.write_str("Windows"),
            Self::MacOs => f.write_str("macOS"),
            Self::Solaris => f.write_str("Solaris"),
            Self::FreeBsd => f.write_str("FreeBSD"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Capability needed by the termination helper: a process that can be addressed by its native
/// OS id and destroyed forcibly.
///
/// Implementations that cannot expose a native id keep the default `native_id`, which fails
/// with `UnsupportedSignal` instead of guessing.
pub trait ProcessHandle {
    fn native_id(&self) -> Result<u32, RunnerError> {
        Err(RunnerError::UnsupportedSignal {
            reason: "process handle does not expose a native id".to_string(),
        })
    }

    /// Kills the process without giving it a chance to clean up.
    fn destroy(&mut self) -> io::Result<()>;
}

impl ProcessHandle for Child {
    fn native_id(&self) -> Result<u32, RunnerError> {
        Ok(self.id())
    }

    fn destroy(&mut self) -> io::Result<()> {
        match self.kill() {
            // Already exited and reaped; nothing left to destroy.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }
}

/// Numeric exit code of a finished child.
///
/// A POSIX child terminated by a signal reports `128 + signal`, as a shell would.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    signal_exit_code(status).unwrap_or(-1)
}

#[cfg(unix)]
fn signal_exit_code(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| 128 + sig)
}

#[cfg(not(unix))]
fn signal_exit_code(_status: ExitStatus) -> Option<i32> {
    None
}

/// Finds the executable that spawning `program` would run.
///
/// A program with a path component is checked as given, and also relative to `dir` when it is
/// relative. A bare name is searched on `search_path`, falling back to the inherited `PATH`.
/// Non-POSIX hosts resolve bare names through rules of their own, so those are passed through.
pub fn locate_program(
    program: &str,
    dir: Option<&Path>,
    search_path: Option<&OsStr>,
) -> io::Result<PathBuf> {
    let candidate = Path::new(program);
    if candidate.is_absolute() || candidate.components().count() > 1 {
        let mut tries = vec![candidate.to_path_buf()];
        if let Some(dir) = dir.filter(|_| candidate.is_relative()) {
            tries.push(dir.join(candidate));
        }
        return tries
            .into_iter()
            .find(|path| is_executable(path))
            .ok_or_else(|| not_found(program));
    }
    if !cfg!(unix) {
        return Ok(candidate.to_path_buf());
    }
    let path = search_path
        .map(OsStr::to_os_string)
        .or_else(|| env::var_os("PATH"))
        .unwrap_or_default();
    env::split_paths(&path)
        .map(|entry| entry.join(program))
        .find(|path| is_executable(path))
        .ok_or_else(|| not_found(program))
}

fn not_found(program: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no executable named '{}' was found", program),
    )
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
