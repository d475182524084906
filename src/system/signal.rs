// src/system/signal.rs

use crate::system::errors::RunnerError;
use crate::system::platform::{Platform, ProcessHandle};
use std::fmt;
use std::process::{Command, Stdio};

/// A POSIX signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signal(i32);

impl Signal {
    /// Hangup detected on controlling terminal or death of controlling process.
    pub const SIGHUP: Self = Self(1);
    /// Interrupt from keyboard.
    pub const SIGINT: Self = Self(2);
    /// Kill signal; cannot be caught.
    pub const SIGKILL: Self = Self(9);
    /// Invalid memory reference.
    pub const SIGSEGV: Self = Self(11);
    /// Termination signal.
    pub const SIGTERM: Self = Self(15);

    /// A signal by number.
    pub const fn new(num: i32) -> Self {
        Self(num)
    }

    /// The signal number.
    pub const fn num(self) -> i32 {
        self.0
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::SIGTERM
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SIGHUP => f.write_str("SIGHUP"),
            Self::SIGINT => f.write_str("SIGINT"),
            Self::SIGKILL => f.write_str("SIGKILL"),
            Self::SIGSEGV => f.write_str("SIGSEGV"),
            Self::SIGTERM => f.write_str("SIGTERM"),
            Self(num) => write!(f, "signal {}", num),
        }
    }
}

/// Delivers `signal` to a running process.
///
/// On POSIX-like hosts this shells out to `kill -<num> <pid>` and reports whether that helper
/// exited with status 0. Elsewhere signals cannot be delivered: the process is destroyed
/// forcibly instead and the call reports success.
pub fn kill<P>(process: &mut P, signal: Signal) -> Result<bool, RunnerError>
where
    P: ProcessHandle + ?Sized,
{
    kill_on(Platform::current(), process, signal)
}

pub(crate) fn kill_on<P>(
    platform: Platform,
    process: &mut P,
    signal: Signal,
) -> Result<bool, RunnerError>
where
    P: ProcessHandle + ?Sized,
{
    if !platform.is_unix_like() {
        log::warn!(
            "Unsupported kill on {} platform, forced destroy will be used instead of {}.",
            platform,
            signal
        );
        destroy_quietly(process);
        return Ok(true);
    }
    let pid = process.native_id()?;
    let sig_arg = format!("-{}", signal.num());
    let pid_arg = pid.to_string();
    log::info!("Killing process: kill {} {}", sig_arg, pid_arg);
    let status = Command::new("kill")
        .arg(&sig_arg)
        .arg(&pid_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| RunnerError::io(&format!("kill {} {}", sig_arg, pid_arg), e))?;
    Ok(status.success())
}

fn destroy_quietly<P: ProcessHandle + ?Sized>(process: &mut P) {
    if let Err(e) = process.destroy() {
        log::warn!("Failed to destroy process: {}", e);
    }
}
