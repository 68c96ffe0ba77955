// src/system/environ.rs

//! Environment assembly for shell runners.

use std::collections::BTreeMap;

/// Host separator for `PATH`-like lists.
pub const LIST_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

/// Builds the environment a task runs with: the process environment without
/// the keys present in `overrides`, followed by `overrides`. On Windows the
/// process keys are upper-cased first and compared case-insensitively.
pub fn compose_env(overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let process_vars = std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));
    compose_from(process_vars, overrides)
}

fn compose_from(
    process_vars: impl Iterator<Item = (String, String)>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let overridden: Vec<String> = overrides.keys().map(|k| normalize_key(k)).collect();
    let mut env: BTreeMap<String, String> = process_vars
        .map(|(key, value)| (normalize_key(&key), value))
        .filter(|(key, _)| !overridden.contains(key))
        .collect();
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

fn normalize_key(key: &str) -> String {
    if cfg!(windows) {
        key.to_uppercase()
    } else {
        key.to_string()
    }
}

/// Looks a variable up, ignoring case on Windows.
pub fn lookup<'a>(env: &'a BTreeMap<String, String>, key: &str) -> Option<&'a String> {
    if let Some(value) = env.get(key) {
        return Some(value);
    }
    if cfg!(windows) {
        return env
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v);
    }
    None
}

/// Reads a variable from the process environment.
pub fn process_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// True when running under CI (`CI=true`).
pub fn is_ci() -> bool {
    process_var(crate::constants::ENV_CI).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_process_values() {
        let process = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("HOME".to_string(), "/home/me".to_string()),
        ];
        let overrides = BTreeMap::from([("PATH".to_string(), "/opt/bin:/usr/bin".to_string())]);
        let env = compose_from(process.into_iter(), &overrides);
        assert_eq!(env.get("PATH").map(String::as_str), Some("/opt/bin:/usr/bin"));
        assert_eq!(env.get("HOME").map(String::as_str), Some("/home/me"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_compose_env_keeps_process_environment() {
        let env = compose_env(&BTreeMap::new());
        assert!(lookup(&env, "PATH").is_some());
    }
}
