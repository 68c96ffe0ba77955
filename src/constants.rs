// src/constants.rs

/// Default directory (relative to the project root) holding the task cache.
pub const DEFAULT_CACHE_DIR: &str = ".buildsys";

/// Name of the optional project configuration file at the project root.
pub const PROJECT_CONFIG_FILENAME: &str = "buildsys.toml";

/// Name of the script used by `configure` when none is given.
pub const DEFAULT_SCRIPT_FILENAME: &str = "build.rhai";

/// Name of the task cache file (inside the cache directory).
pub const TASK_CACHE_FILENAME: &str = "tasks.cache.bin";

/// Extension appended to imported module paths that have none.
pub const SCRIPT_EXTENSION: &str = "rhai";

/// Name of the script function invoked for the configure phase. Reserved as a task name.
pub const CONFIGURE_FN: &str = "configure";

/// Prefix of the generated names of anonymous tasks.
pub const AUTO_TASK_PREFIX: &str = "auto#";

/// First argument the shell uses to route a command to the in-process file tools.
pub const TOOL_SENTINEL: &str = "tool";

/// Commands re-routed to the in-process file tools.
pub const ROUTED_COMMANDS: &[&str] = &["cp", "mv", "rm", "mkdir", "touch", "sleep"];

/// Output spread (in seconds) above which the staleness check warns.
pub const OUTPUT_SPREAD_WARNING_SECS: u64 = 10 * 60;

/// Env var that tolerates console-reset failures.
pub const ENV_CI: &str = "CI";

/// Env var that turns on verbose logging.
pub const ENV_DEBUG: &str = "BUILDSYS_DEBUG";

/// Env var holding an `env_logger` filter.
pub const ENV_LOG: &str = "BUILDSYS_LOG";
