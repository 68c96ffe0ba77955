// src/core/cache.rs

//! The on-disk task cache.
//!
//! `<cache_dir>/tasks.cache.bin` is an LZ4 block (size prepended) holding three
//! consecutive bincode records: the effective option values, the flattened
//! task graph and the list of script files the evaluation read. The file is
//! written to a temporary sibling and renamed into place.

use crate::constants::TASK_CACHE_FILENAME;
use crate::core::graph::{self, GraphError};
use crate::models::{CachedTask, OptionValues, TaskList};
use log::{debug, trace};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("No task cache found in '{0}'. Run 'buildsys configure' first.")]
    Missing(PathBuf),
    #[error("Filesystem error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Task cache '{path}' is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("Failed to decode task cache: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("Failed to encode task cache: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Everything a configure run leaves behind.
#[derive(Debug, Default)]
pub struct CacheContents {
    pub options: OptionValues,
    pub tasks: TaskList,
    pub script_files: Vec<PathBuf>,
}

pub fn cache_file(cache_dir: &Path) -> PathBuf {
    cache_dir.join(TASK_CACHE_FILENAME)
}

/// Serializes and atomically replaces the cache file.
pub fn write(cache_dir: &Path, contents: &CacheContents) -> Result<(), CacheError> {
    let io_error = |source| CacheError::Io {
        path: cache_dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(cache_dir).map_err(io_error)?;

    let records = graph::to_cached(&contents.tasks);
    let mut raw = Vec::new();
    append_record(&mut raw, &contents.options)?;
    append_record(&mut raw, &records)?;
    append_record(&mut raw, &contents.script_files)?;
    trace!("Serialized task cache to {} bytes.", raw.len());

    let compressed = lz4_flex::compress_prepend_size(&raw);
    trace!("Compressed task cache to {} bytes.", compressed.len());

    let mut temp = NamedTempFile::new_in(cache_dir).map_err(io_error)?;
    temp.write_all(&compressed).map_err(io_error)?;
    let target = cache_file(cache_dir);
    temp.persist(&target).map_err(|e| CacheError::Io {
        path: target.clone(),
        source: e.error,
    })?;
    debug!(
        "Wrote {} tasks and {} tracked files to '{}'",
        records.len(),
        contents.script_files.len(),
        target.display()
    );
    Ok(())
}

fn append_record<T: Serialize>(buffer: &mut Vec<u8>, value: &T) -> Result<(), CacheError> {
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
    buffer.extend_from_slice(&bytes);
    Ok(())
}

/// Loads the cache and rebuilds the shared task graph.
pub fn read(cache_dir: &Path) -> Result<CacheContents, CacheError> {
    let path = cache_file(cache_dir);
    let compressed = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CacheError::Missing(cache_dir.to_path_buf()));
        }
        Err(source) => return Err(CacheError::Io { path, source }),
    };
    if compressed.is_empty() {
        return Err(CacheError::Corrupt {
            path,
            reason: "file is empty".to_string(),
        });
    }
    let raw = lz4_flex::decompress_size_prepended(&compressed).map_err(|e| CacheError::Corrupt {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    let mut rest = raw.as_slice();
    let options: OptionValues = next_record(&mut rest)?;
    let records: Vec<CachedTask> = next_record(&mut rest)?;
    let script_files: Vec<PathBuf> = next_record(&mut rest)?;
    if !rest.is_empty() {
        return Err(CacheError::Corrupt {
            path,
            reason: format!("{} trailing bytes", rest.len()),
        });
    }

    Ok(CacheContents {
        options,
        tasks: graph::from_cached(records)?,
        script_files,
    })
}

fn next_record<T: DeserializeOwned>(rest: &mut &[u8]) -> Result<T, CacheError> {
    let (value, consumed): (T, usize) = bincode::serde::decode_from_slice(*rest, bincode::config::standard())?;
    *rest = rest.get(consumed..).unwrap_or_default();
    Ok(value)
}

/// Returns the first tracked file modified after the cache was written, or
/// that no longer exists.
pub fn newer_file(cache_dir: &Path, script_files: &[PathBuf]) -> Result<Option<PathBuf>, CacheError> {
    let path = cache_file(cache_dir);
    let cache_time = fs::metadata(&path)
        .and_then(|m| m.modified())
        .map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => CacheError::Missing(cache_dir.to_path_buf()),
            _ => CacheError::Io {
                path: path.clone(),
                source,
            },
        })?;

    for file in script_files {
        match fs::metadata(file).and_then(|m| m.modified()) {
            Ok(modified) if modified <= cache_time => {}
            Ok(_) => return Ok(Some(file.clone())),
            Err(e) => {
                debug!("Tracked file '{}' is unreadable: {}", file.display(), e);
                return Ok(Some(file.clone()));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Command, ShellFragment, Task};
    use crate::system::tools;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn sample() -> CacheContents {
        let leaf = Arc::new(Task {
            short_name: "leaf".to_string(),
            base_dir: PathBuf::from("/p"),
            outputs: vec!["out/leaf.o".to_string()],
            commands: vec![Command::Shell(ShellFragment {
                task_name: "leaf".to_string(),
                index: 0,
                content: "cc -c leaf.c".to_string(),
            })],
            ..Task::default()
        });
        let root = Arc::new(Task {
            short_name: "root".to_string(),
            base_dir: PathBuf::from("/p"),
            deps: vec!["leaf".to_string()],
            commands: vec![Command::TaskRef(Arc::clone(&leaf))],
            ignore_exit: true,
            ..Task::default()
        });
        CacheContents {
            options: OptionValues::from([("mode".to_string(), "release".to_string())]),
            tasks: TaskList::from([("leaf".to_string(), leaf), ("root".to_string(), root)]),
            script_files: vec![PathBuf::from("/p/build.rhai")],
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &sample()).unwrap();
        let loaded = read(dir.path()).unwrap();

        assert_eq!(loaded.options["mode"], "release");
        assert_eq!(loaded.script_files, [PathBuf::from("/p/build.rhai")]);
        let root = &loaded.tasks["root"];
        assert!(root.ignore_exit);
        assert_eq!(root.deps, ["leaf"]);
        let Command::TaskRef(target) = &root.commands[0] else {
            panic!("expected a task reference");
        };
        assert!(Arc::ptr_eq(target, &loaded.tasks["leaf"]));
    }

    #[test]
    fn test_missing_and_corrupt_cache() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(read(dir.path()), Err(CacheError::Missing(_))));

        fs::write(cache_file(dir.path()), b"not lz4 at all").unwrap();
        assert!(read(dir.path()).is_err());
    }

    #[test]
    fn test_newer_file_detects_edits() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("build.rhai");
        fs::write(&script, "fn configure() {}").unwrap();
        let past = SystemTime::now() - Duration::from_secs(60);
        tools::stamp(&script, past).unwrap();

        write(dir.path(), &CacheContents::default()).unwrap();
        let tracked = vec![script.clone()];
        assert_eq!(newer_file(dir.path(), &tracked).unwrap(), None);

        tools::stamp(&script, SystemTime::now() + Duration::from_secs(60)).unwrap();
        assert_eq!(newer_file(dir.path(), &tracked).unwrap(), Some(script.clone()));

        fs::remove_file(&script).unwrap();
        assert_eq!(newer_file(dir.path(), &tracked).unwrap(), Some(script));
    }
}
