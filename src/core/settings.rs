// src/core/settings.rs

//! Project settings: the project root plus the optional `buildsys.toml`.

use crate::constants::{DEFAULT_CACHE_DIR, DEFAULT_SCRIPT_FILENAME, PROJECT_CONFIG_FILENAME};
use crate::core::paths::PathContext;
use crate::models::OptionValues;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{fs, io};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Project root '{path}' is not accessible: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to expand cache directory '{value}': {source}")]
    Expand {
        value: String,
        #[source]
        source: shellexpand::LookupError<std::env::VarError>,
    },
}

/// The on-disk shape of `buildsys.toml`.
#[derive(Deserialize, Debug, Default)]
#[serde(default, deny_unknown_fields)]
struct ProjectFile {
    script: Option<String>,
    cache_dir: Option<String>,
    options: BTreeMap<String, toml::Value>,
}

/// Resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub project_root: PathBuf,
    /// Script used when `configure` is not given one.
    pub script: PathBuf,
    pub cache_dir: PathBuf,
    /// Option defaults from the project file, applied before `--option` flags.
    pub options: OptionValues,
}

impl Settings {
    /// Loads settings for `root`, or for the current directory.
    pub fn load(root: Option<&Path>) -> Result<Self, SettingsError> {
        let requested = match root {
            Some(path) => path.to_path_buf(),
            None => std::env::current_dir().map_err(|source| SettingsError::Root {
                path: PathBuf::from("."),
                source,
            })?,
        };
        let project_root = dunce::canonicalize(&requested).map_err(|source| SettingsError::Root {
            path: requested.clone(),
            source,
        })?;

        let file_path = project_root.join(PROJECT_CONFIG_FILENAME);
        let file = match fs::read_to_string(&file_path) {
            Ok(text) => toml::from_str::<ProjectFile>(&text).map_err(|source| SettingsError::Parse {
                path: file_path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => ProjectFile::default(),
            Err(source) => {
                return Err(SettingsError::Io {
                    path: file_path,
                    source,
                });
            }
        };

        Self::from_file(project_root, file)
    }

    fn from_file(project_root: PathBuf, file: ProjectFile) -> Result<Self, SettingsError> {
        let ctx = PathContext::new(project_root.clone(), project_root.clone());

        let raw_cache_dir = file.cache_dir.unwrap_or_else(|| DEFAULT_CACHE_DIR.to_string());
        let expanded = shellexpand::full(&raw_cache_dir).map_err(|source| SettingsError::Expand {
            value: raw_cache_dir.clone(),
            source,
        })?;
        let cache_dir = ctx.resolve(&expanded);

        let script = ctx.resolve(file.script.as_deref().unwrap_or(DEFAULT_SCRIPT_FILENAME));

        let options = file
            .options
            .into_iter()
            .map(|(name, value)| {
                let text = match value {
                    toml::Value::String(s) => s,
                    other => other.to_string(),
                };
                (name, text)
            })
            .collect();

        log::debug!(
            "Settings: root='{}', script='{}', cache='{}'",
            project_root.display(),
            script.display(),
            cache_dir.display()
        );

        Ok(Self {
            project_root,
            script,
            cache_dir,
            options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_project_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(Some(dir.path())).unwrap();
        assert_eq!(settings.script, settings.project_root.join(DEFAULT_SCRIPT_FILENAME));
        assert_eq!(settings.cache_dir, settings.project_root.join(DEFAULT_CACHE_DIR));
        assert!(settings.options.is_empty());
    }

    #[test]
    fn test_project_file_values() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(PROJECT_CONFIG_FILENAME),
            "script = \"scripts/main.rhai\"\ncache_dir = \"out/cache\"\n\n[options]\nmode = \"debug\"\nlto = true\njobs = 4\n",
        )
        .unwrap();
        let settings = Settings::load(Some(dir.path())).unwrap();
        assert_eq!(settings.script, settings.project_root.join("scripts").join("main.rhai"));
        assert_eq!(settings.cache_dir, settings.project_root.join("out").join("cache"));
        assert_eq!(settings.options["mode"], "debug");
        assert_eq!(settings.options["lto"], "true");
        assert_eq!(settings.options["jobs"], "4");
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PROJECT_CONFIG_FILENAME), "scirpt = \"x\"\n").unwrap();
        assert!(matches!(
            Settings::load(Some(dir.path())),
            Err(SettingsError::Parse { .. })
        ));
    }
}
