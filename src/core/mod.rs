// src/core/mod.rs

pub mod assembler;
pub mod bool_expr;
pub mod cache;
pub mod graph;
pub mod paths;
pub mod script;
pub mod settings;
pub mod task_runner;
