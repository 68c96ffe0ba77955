// src/system/console.rs

//! Console state management.
//!
//! Some Windows binaries (the MSVC toolchain in particular) switch the console
//! out of virtual-terminal mode, after which colored log output shows up as raw
//! escape sequences. The task runner calls [`reset_console`] after every
//! statement to switch it back. On other hosts this is a no-op.

use std::io::IsTerminal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Failed to re-enable virtual terminal processing on the console.")]
    VirtualTerminal,
}

/// Restores virtual-terminal processing on the attached console.
pub fn reset_console() -> Result<(), ConsoleError> {
    if !std::io::stdout().is_terminal() {
        return Ok(());
    }
    enable_virtual_terminal()
}

#[cfg(windows)]
fn enable_virtual_terminal() -> Result<(), ConsoleError> {
    colored::control::set_virtual_terminal(true).map_err(|_| ConsoleError::VirtualTerminal)
}

#[cfg(not(windows))]
#[allow(clippy::unnecessary_wraps)]
fn enable_virtual_terminal() -> Result<(), ConsoleError> {
    Ok(())
}
