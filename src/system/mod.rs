//! # System Interaction Layer
//!
//! Everything that touches the host directly: the embedded shell that runs
//! task commands, environment assembly, console state and the portable file
//! tools.
//!
//! ## Modules
//!
//! - **`shell`**: Parser, printer and interpreter for the `sh` subset used by
//!   task commands. Process spawning goes through replaceable handlers.
//! - **`environ`**: Builds task environments from the process environment and
//!   per-task overrides.
//! - **`console`**: Restores console modes that child processes may clobber.
//! - **`tools`**: `cp`, `mv`, `rm`, `mkdir`, `touch` and `sleep` implemented
//!   in-process.

pub mod console;
pub mod environ;
pub mod shell;
pub mod tools;
