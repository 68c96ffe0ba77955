// src/core/graph.rs

//! Conversion between the shared in-memory task graph and its flat,
//! serializable form.
//!
//! Task references become names on the way out. On the way back every name is
//! resolved to the single `Arc` built for that task, so two references to the
//! same task point at the same allocation again.

use crate::models::{CachedCommand, CachedTask, Command, Task, TaskList};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Task '{task}' references unknown task '{target}'")]
    UnknownReference { task: String, target: String },
    #[error("Task '{0}' appears more than once in the cached graph")]
    Duplicate(String),
}

/// Flattens the graph. Referenced tasks always precede the tasks that
/// reference them.
pub fn to_cached(tasks: &TaskList) -> Vec<CachedTask> {
    let mut visited = HashSet::new();
    let mut records = Vec::with_capacity(tasks.len());
    for task in tasks.values() {
        push_record(task, &mut visited, &mut records);
    }
    records
}

fn push_record(task: &Arc<Task>, visited: &mut HashSet<String>, records: &mut Vec<CachedTask>) {
    if !visited.insert(task.short_name.clone()) {
        return;
    }
    for command in &task.commands {
        if let Command::TaskRef(target) = command {
            push_record(target, visited, records);
        }
    }
    records.push(CachedTask {
        short_name: task.short_name.clone(),
        description: task.description.clone(),
        hidden: task.hidden,
        base_dir: task.base_dir.clone(),
        deps: task.deps.clone(),
        skip_if_exists: task.skip_if_exists.clone(),
        inputs: task.inputs.clone(),
        outputs: task.outputs.clone(),
        env: task.env.clone(),
        commands: task
            .commands
            .iter()
            .map(|command| match command {
                Command::Shell(fragment) => CachedCommand::Shell(fragment.clone()),
                Command::TaskRef(target) => CachedCommand::TaskRef(target.short_name.clone()),
            })
            .collect(),
        ignore_exit: task.ignore_exit,
    });
}

/// Rebuilds the shared graph from flat records.
pub fn from_cached(records: Vec<CachedTask>) -> Result<TaskList, GraphError> {
    let mut pending: HashMap<String, CachedTask> = HashMap::with_capacity(records.len());
    let mut order = Vec::with_capacity(records.len());
    for record in records {
        if pending.contains_key(&record.short_name) {
            return Err(GraphError::Duplicate(record.short_name));
        }
        order.push(record.short_name.clone());
        pending.insert(record.short_name.clone(), record);
    }

    let mut built = TaskList::new();
    for name in order {
        build(&name, &mut pending, &mut built)?;
    }
    Ok(built)
}

fn build(
    name: &str,
    pending: &mut HashMap<String, CachedTask>,
    built: &mut TaskList,
) -> Result<Arc<Task>, GraphError> {
    if let Some(task) = built.get(name) {
        return Ok(Arc::clone(task));
    }
    let Some(record) = pending.remove(name) else {
        return Err(GraphError::UnknownReference {
            task: name.to_string(),
            target: name.to_string(),
        });
    };

    let mut commands = Vec::with_capacity(record.commands.len());
    for command in record.commands {
        commands.push(match command {
            CachedCommand::Shell(fragment) => Command::Shell(fragment),
            CachedCommand::TaskRef(target) => {
                if !built.contains_key(&target) && !pending.contains_key(&target) {
                    return Err(GraphError::UnknownReference {
                        task: record.short_name,
                        target,
                    });
                }
                Command::TaskRef(build(&target, pending, built)?)
            }
        });
    }

    let task = Arc::new(Task {
        short_name: record.short_name,
        description: record.description,
        hidden: record.hidden,
        base_dir: record.base_dir,
        deps: record.deps,
        skip_if_exists: record.skip_if_exists,
        inputs: record.inputs,
        outputs: record.outputs,
        env: record.env,
        commands,
        ignore_exit: record.ignore_exit,
    });
    built.insert(task.short_name.clone(), Arc::clone(&task));
    Ok(task)
}

/// Freezes the configure-phase environment overrides into every task. Keys
/// set on the task itself win.
pub fn finalize(tasks: &TaskList, overrides: &BTreeMap<String, String>) -> Result<TaskList, GraphError> {
    let mut records = to_cached(tasks);
    for record in &mut records {
        let own = std::mem::take(&mut record.env);
        let mut env: BTreeMap<String, String> = overrides
            .iter()
            .filter(|(key, _)| !own.keys().any(|k| same_key(k, key)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.extend(own);
        record.env = env;
    }
    from_cached(records)
}

fn same_key(a: &str, b: &str) -> bool {
    if cfg!(windows) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ShellFragment;
    use std::path::PathBuf;

    fn task(name: &str, commands: Vec<Command>) -> Arc<Task> {
        Arc::new(Task {
            short_name: name.to_string(),
            base_dir: PathBuf::from("/project"),
            commands,
            ..Task::default()
        })
    }

    fn shell(task: &str, content: &str) -> Command {
        Command::Shell(ShellFragment {
            task_name: task.to_string(),
            index: 0,
            content: content.to_string(),
        })
    }

    fn sample_graph() -> TaskList {
        let gen_task = task("gen", vec![shell("gen", "echo gen")]);
        let build = task(
            "build",
            vec![Command::TaskRef(Arc::clone(&gen_task)), shell("build", "cc main.c")],
        );
        let all = task(
            "all",
            vec![Command::TaskRef(Arc::clone(&build)), Command::TaskRef(Arc::clone(&gen_task))],
        );
        TaskList::from([
            ("all".to_string(), all),
            ("build".to_string(), build),
            ("gen".to_string(), gen_task),
        ])
    }

    #[test]
    fn test_references_come_first() {
        let records = to_cached(&sample_graph());
        let names: Vec<&str> = records.iter().map(|r| r.short_name.as_str()).collect();
        assert_eq!(names, ["gen", "build", "all"]);
        assert_eq!(records[2].commands[0], CachedCommand::TaskRef("build".to_string()));
    }

    #[test]
    fn test_round_trip_restores_shared_pointers() {
        let rebuilt = from_cached(to_cached(&sample_graph())).unwrap();
        let gen_task = &rebuilt["gen"];
        let Command::TaskRef(from_all) = &rebuilt["all"].commands[1] else {
            panic!("expected a task reference");
        };
        let Command::TaskRef(build) = &rebuilt["all"].commands[0] else {
            panic!("expected a task reference");
        };
        let Command::TaskRef(from_build) = &build.commands[0] else {
            panic!("expected a task reference");
        };
        assert!(Arc::ptr_eq(gen_task, from_all));
        assert!(Arc::ptr_eq(gen_task, from_build));
        assert!(Arc::ptr_eq(&rebuilt["build"], build));
    }

    #[test]
    fn test_unknown_reference_is_an_error() {
        let mut records = to_cached(&sample_graph());
        records.retain(|r| r.short_name != "gen");
        let err = from_cached(records).unwrap_err();
        assert!(matches!(err, GraphError::UnknownReference { ref target, .. } if target == "gen"));
    }

    #[test]
    fn test_finalize_merges_overrides_under_task_env() {
        let mut own = Task {
            short_name: "t".to_string(),
            ..Task::default()
        };
        own.env.insert("CC".to_string(), "clang".to_string());
        let tasks = TaskList::from([("t".to_string(), Arc::new(own))]);
        let overrides = BTreeMap::from([
            ("CC".to_string(), "gcc".to_string()),
            ("PATH".to_string(), "/opt/bin".to_string()),
        ]);
        let finalized = finalize(&tasks, &overrides).unwrap();
        let env = &finalized["t"].env;
        assert_eq!(env["CC"], "clang");
        assert_eq!(env["PATH"], "/opt/bin");
    }
}
