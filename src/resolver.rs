//! Fallback module resolution next to the application under test.
//!
//! Scripts frequently `require` helper modules that ship alongside the target
//! application rather than on Lua's default search path. [`LibraryResolver`]
//! is appended to `package.searchers`, so it only runs after the standard
//! searchers failed, and probes the target's directory:
//!
//! ```text
//! require("helpers")
//!   1. default searchers (package.preload, package.path, package.cpath)
//!   2. {target dir}/helpers.lua
//!   3. {target dir}/helpers.{so,dylib,dll}
//!   -> Lua's own "module not found" error
//! ```

use mlua::{Function, Lua, Table, Value};
use std::env::consts::DLL_EXTENSION;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What kind of file satisfied a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Lua source, compiled into a loader.
    Script,
    /// Native library opened through `package.loadlib`.
    Native,
}

/// A file found for a requested module name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFile {
    pub path: PathBuf,
    pub kind: ModuleKind,
}

/// A loaded module, ready to be handed back to `require`.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub loader: Function,
    pub path: PathBuf,
}

/// Resolves modules relative to a fixed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryResolver {
    directory: PathBuf,
}

impl LibraryResolver {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Resolver for the directory containing `target`. A bare file name
    /// resolves against the current directory.
    pub fn for_target(target: impl AsRef<Path>) -> Self {
        let directory = match target.as_ref().parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self { directory }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Candidate files for `name`, in probe order.
    pub fn candidates(&self, name: &str) -> Vec<ModuleFile> {
        if !is_simple_name(name) {
            return Vec::new();
        }
        vec![
            ModuleFile {
                path: self.directory.join(format!("{name}.lua")),
                kind: ModuleKind::Script,
            },
            ModuleFile {
                path: self.directory.join(format!("{name}.{DLL_EXTENSION}")),
                kind: ModuleKind::Native,
            },
        ]
    }

    /// Find the first existing candidate for `name`.
    pub fn probe(&self, name: &str) -> Option<ModuleFile> {
        self.candidates(name)
            .into_iter()
            .find(|candidate| candidate.path.is_file())
    }

    /// Probe for `name` and load it into `lua`.
    ///
    /// Returns `None` when nothing was found or the file could not be loaded;
    /// the failure is logged and never raised.
    pub fn resolve(&self, lua: &Lua, name: &str) -> Option<Resolution> {
        let module = self.probe(name)?;
        let loaded = match module.kind {
            ModuleKind::Script => load_script(lua, &module.path),
            ModuleKind::Native => load_native(lua, name, &module.path),
        };
        match loaded {
            Ok(loader) => {
                debug!(module = name, path = %module.path.display(), "resolved module");
                Some(Resolution {
                    loader,
                    path: module.path,
                })
            }
            Err(err) => {
                warn!(module = name, path = %module.path.display(), error = %err, "failed to load module");
                None
            }
        }
    }

    /// Append this resolver to `package.searchers` of `lua`.
    pub fn install(self, lua: &Lua) -> mlua::Result<()> {
        let package: Table = lua.globals().get("package")?;
        let searchers: Table = package.get("searchers")?;

        let searcher = lua.create_function(move |lua, name: String| {
            match self.resolve(lua, &name) {
                Some(resolution) => {
                    let path = lua.create_string(&*resolution.path.to_string_lossy())?;
                    Ok((Value::Function(resolution.loader), Value::String(path)))
                }
                None => {
                    let tried: Vec<String> = self
                        .candidates(&name)
                        .iter()
                        .map(|candidate| format!("no file '{}'", candidate.path.display()))
                        .collect();
                    let message = if tried.is_empty() {
                        format!("'{name}' is not a simple module name")
                    } else {
                        tried.join("\n\t")
                    };
                    Ok((Value::String(lua.create_string(&message)?), Value::Nil))
                }
            }
        })?;

        searchers.raw_set(searchers.raw_len() + 1, searcher)
    }
}

/// Module names must stay inside the resolver's directory.
fn is_simple_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.contains("..")
}

fn load_script(lua: &Lua, path: &Path) -> mlua::Result<Function> {
    let source = fs::read_to_string(path).map_err(mlua::Error::external)?;
    lua.load(source)
        .set_name(format!("@{}", path.display()))
        .into_function()
}

fn load_native(lua: &Lua, name: &str, path: &Path) -> mlua::Result<Function> {
    let package: Table = lua.globals().get("package")?;
    let loadlib: Function = package.get("loadlib")?;
    let symbol = format!("luaopen_{}", name.replace('.', "_"));
    let (loader, message): (Value, Option<String>) =
        loadlib.call((path.to_string_lossy().into_owned(), symbol))?;
    match loader {
        Value::Function(loader) => Ok(loader),
        _ => Err(mlua::Error::RuntimeError(
            message.unwrap_or_else(|| format!("cannot open {}", path.display())),
        )),
    }
}
