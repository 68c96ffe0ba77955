// src/core/script/modules.rs

use super::context::{ModuleSlot, SharedCtx};
use crate::constants::SCRIPT_EXTENSION;
use rhai::{Engine, EvalAltResult, Module, ModuleResolver, Position, Scope, Shared};
use std::fs;
use std::path::{Path, PathBuf};

/// Resolves `import "path" as name;` through the path normalizer and memoizes
/// every module by absolute path.
#[derive(Debug)]
pub(crate) struct ScriptModuleResolver {
    ctx: SharedCtx,
}

impl ScriptModuleResolver {
    pub(crate) fn new(ctx: SharedCtx) -> Self {
        Self { ctx }
    }

    fn module_path(&self, source: Option<&str>, path: &str) -> PathBuf {
        let c = self.ctx.borrow();
        let importer = source.map_or_else(|| c.filepath.clone(), PathBuf::from);
        let mut resolved = crate::core::paths::PathContext::for_script(c.project_root.clone(), &importer).resolve(path);
        if resolved.extension().is_none() {
            resolved.set_extension(SCRIPT_EXTENSION);
        }
        resolved
    }

    fn load(&self, engine: &Engine, file: &Path, pos: Position) -> Result<Module, Box<EvalAltResult>> {
        let source = fs::read_to_string(file).map_err(|e| {
            EvalAltResult::ErrorSystem(format!("Failed to read module '{}'", file.display()), Box::new(e))
        })?;
        let mut ast = engine.compile(&source).map_err(|e| {
            Box::new(EvalAltResult::ErrorParsing(*e.0, e.1))
        })?;
        ast.set_source(file.display().to_string());

        let previous = std::mem::replace(&mut self.ctx.borrow_mut().filepath, file.to_path_buf());
        let ctx = self.ctx.clone();
        let _restore = scopeguard::guard(previous, move |previous| {
            ctx.borrow_mut().filepath = previous;
        });

        log::debug!("Evaluating module '{}'", file.display());
        Module::eval_ast_as_new(Scope::new(), &ast, engine)
            .map_err(|e| Box::new(EvalAltResult::ErrorInModule(file.display().to_string(), e, pos)))
    }
}

impl ModuleResolver for ScriptModuleResolver {
    fn resolve(
        &self,
        engine: &Engine,
        source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        let file = self.module_path(source, path);

        let slot = self.ctx.borrow().modules.get(&file).cloned();
        match slot {
            Some(ModuleSlot::Loaded(module)) => return Ok(module),
            Some(ModuleSlot::Loading) => {
                return Err(format!("circular import of '{}'", file.display()).into());
            }
            None => {}
        }

        {
            let mut c = self.ctx.borrow_mut();
            c.track(&file);
            c.modules.insert(file.clone(), ModuleSlot::Loading);
        }

        match self.load(engine, &file, pos) {
            Ok(module) => {
                let module: Shared<Module> = module.into();
                self.ctx
                    .borrow_mut()
                    .modules
                    .insert(file, ModuleSlot::Loaded(module.clone()));
                Ok(module)
            }
            Err(e) => {
                self.ctx.borrow_mut().modules.remove(&file);
                Err(e)
            }
        }
    }
}
