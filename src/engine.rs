//! Lua evaluation engine configured for interactive use.
//!
//! An [`Engine`] owns one Lua VM for the lifetime of the shell. State
//! accumulates across evaluations: globals assigned by one input are visible
//! to the next. Construction order:
//!
//! 1. create the VM (full or safe standard library, see [`EngineConfig`])
//! 2. append the [`LibraryResolver`] to `package.searchers`
//! 3. bind `print` to the [`Console`] and install the interactive helpers
//! 4. import [`DOMAIN_TYPES`]

use crate::automation::{self, DOMAIN_TYPES, TYPE_NAME_KEY};
use crate::bootstrap::lua_string_literal;
use crate::io_adapters::Console;
use crate::resolver::LibraryResolver;
use crate::shell::ExitCode;
use mlua::{Function, Lua, LuaOptions, MultiValue, StdLib, Table, ThreadStatus, Value, Variadic};
use std::cell::Cell;
use std::io;
use std::rc::Rc;
use thiserror::Error;
use tracing::debug;

/// Chunk name reported in error messages for user input.
const CHUNK_NAME: &str = "=input";

/// Errors reported by [`Evaluator::evaluate`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The input ends inside an open construct and needs more lines.
    #[error("incomplete input")]
    Incomplete,

    #[error(transparent)]
    Lua(#[from] mlua::Error),

    #[error("console write failed: {0}")]
    Io(#[from] io::Error),
}

/// What top-level input is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopLevelBase {
    /// `help`, `quit` and `describe` resolve by simple name from any input.
    Interactive,
    /// Plain globals only.
    Bare,
}

/// Engine settings, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Open the full standard library, including `debug` and native modules.
    pub unsafe_allowed: bool,
    pub top_level_base: TopLevelBase,
    /// Print a description instead of an address for imported type objects.
    pub describe_types: bool,
    /// Run coroutine results to completion and report their final values.
    pub await_tasks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unsafe_allowed: true,
            top_level_base: TopLevelBase::Interactive,
            describe_types: true,
            await_tasks: true,
        }
    }
}

/// Result of evaluating one input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    /// Rendered values, tab separated; `None` when the input produced none.
    pub value: Option<String>,
}

/// Anything the shell can feed input to.
pub trait Evaluator {
    fn evaluate(&mut self, input: &str) -> Result<Evaluation, EngineError>;

    /// Exit code requested by the evaluated code, consumed on read.
    fn take_exit_request(&mut self) -> Option<ExitCode> {
        None
    }
}

/// Lua VM with the domain types imported.
pub struct Engine {
    lua: Lua,
    config: EngineConfig,
    tostring: Function,
    exit_request: Rc<Cell<Option<ExitCode>>>,
    imported: Vec<&'static str>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        resolver: Option<LibraryResolver>,
        console: Console,
    ) -> Result<Self, EngineError> {
        let lua = create_vm(config.unsafe_allowed);

        if let Some(resolver) = resolver {
            debug!(directory = %resolver.directory().display(), "registering library resolver");
            resolver.install(&lua)?;
        }

        let tostring: Function = lua.globals().get("tostring")?;
        let exit_request = Rc::new(Cell::new(None));

        install_print(&lua, &console, &tostring)?;
        if config.top_level_base == TopLevelBase::Interactive {
            install_interactive_base(&lua, &console, &exit_request)?;
        }

        let mut imported = Vec::with_capacity(DOMAIN_TYPES.len());
        for ty in DOMAIN_TYPES.iter() {
            lua.globals().set(ty.name, ty.create(&lua)?)?;
            imported.push(ty.name);
        }
        debug!(?config, types = ?imported, "engine configured");

        Ok(Self {
            lua,
            config,
            tostring,
            exit_request,
            imported,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Short names of the imported domain types.
    pub fn imported_types(&self) -> &[&'static str] {
        &self.imported
    }

    /// Compile `input` as an expression when possible, otherwise as a block.
    fn compile(&self, input: &str) -> Result<Function, EngineError> {
        let expression = self
            .lua
            .load(format!("return {input}"))
            .set_name(CHUNK_NAME)
            .into_function();
        if let Ok(function) = expression {
            return Ok(function);
        }

        match self.lua.load(input).set_name(CHUNK_NAME).into_function() {
            Ok(function) => Ok(function),
            Err(mlua::Error::SyntaxError {
                incomplete_input: true,
                ..
            }) => Err(EngineError::Incomplete),
            Err(err) => Err(EngineError::Lua(err)),
        }
    }

    fn render(&self, value: &Value) -> Result<String, EngineError> {
        match value {
            Value::String(text) => Ok(lua_string_literal(&text.to_string_lossy())),
            Value::Table(table) if self.config.describe_types => match imported_type_of(table) {
                Some(ty) => Ok(ty.describe()),
                None => Ok(self.tostring.call::<String>(value.clone())?),
            },
            _ => Ok(self.tostring.call::<String>(value.clone())?),
        }
    }
}

impl Evaluator for Engine {
    fn evaluate(&mut self, input: &str) -> Result<Evaluation, EngineError> {
        let function = self.compile(input)?;
        let mut values: Vec<Value> = function.call::<MultiValue>(())?.into_iter().collect();
        if self.config.await_tasks {
            values = await_task(values)?;
        }

        if values.is_empty() {
            return Ok(Evaluation { value: None });
        }
        let rendered = values
            .iter()
            .map(|value| self.render(value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Evaluation {
            value: Some(rendered.join("\t")),
        })
    }

    fn take_exit_request(&mut self) -> Option<ExitCode> {
        self.exit_request.take()
    }
}

fn create_vm(unsafe_allowed: bool) -> Lua {
    if unsafe_allowed {
        // SAFETY: input comes from the local user, who may load native modules
        // and use `debug` with the shell's own privileges.
        unsafe { Lua::unsafe_new_with(StdLib::ALL, LuaOptions::new()) }
    } else {
        Lua::new()
    }
}

/// Drive a lone coroutine result to completion.
///
/// A coroutine that cannot be resumed (finished or failed) is left as the
/// value itself.
fn await_task(values: Vec<Value>) -> mlua::Result<Vec<Value>> {
    let thread = match values.as_slice() {
        [Value::Thread(thread)] => thread.clone(),
        _ => return Ok(values),
    };
    let mut last = None;
    while matches!(thread.status(), ThreadStatus::Resumable) {
        last = Some(thread.resume::<MultiValue>(())?);
    }
    match last {
        Some(results) => Ok(results.into_iter().collect()),
        None => Ok(values),
    }
}

fn imported_type_of(table: &Table) -> Option<&'static automation::ImportedType> {
    let name: Option<String> = table.raw_get(TYPE_NAME_KEY).ok()?;
    automation::find_type(&name?)
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::Table(table) => match imported_type_of(table) {
            Some(ty) => ty.describe(),
            None => "table".to_string(),
        },
        Value::UserData(data) => match automation::instance_type(data) {
            Some(name) => format!("{name} instance"),
            None => "userdata".to_string(),
        },
        other => other.type_name().to_string(),
    }
}

fn help_text() -> String {
    let mut text = String::from(
        "Helpers:\n\
         \x20 help()           show this message\n\
         \x20 quit([code])     leave the shell\n\
         \x20 describe(value)  describe a value or imported type\n\
         \x20 print(...)       write values to the console\n\
         Imported types:\n",
    );
    for ty in DOMAIN_TYPES.iter() {
        text.push_str(&format!("  {:<22} {}\n", ty.name, ty.summary));
    }
    text
}

fn install_print(lua: &Lua, console: &Console, tostring: &Function) -> mlua::Result<()> {
    let console = console.clone();
    let tostring = tostring.clone();
    let print = lua.create_function(move |_, args: Variadic<Value>| {
        let parts = args
            .iter()
            .map(|value| tostring.call::<String>(value.clone()))
            .collect::<mlua::Result<Vec<_>>>()?;
        console
            .write_out(&format!("{}\n", parts.join("\t")))
            .map_err(mlua::Error::external)
    })?;
    lua.globals().set("print", print)
}

/// Serve the helpers through the `__index` of the global table, so user
/// globals with the same name take precedence.
fn install_interactive_base(
    lua: &Lua,
    console: &Console,
    exit_request: &Rc<Cell<Option<ExitCode>>>,
) -> mlua::Result<()> {
    let helpers = lua.create_table()?;

    let help_console = console.clone();
    helpers.set(
        "help",
        lua.create_function(move |_, ()| {
            help_console
                .write_out(&help_text())
                .map_err(mlua::Error::external)
        })?,
    )?;

    let exit_request = exit_request.clone();
    helpers.set(
        "quit",
        lua.create_function(move |_, code: Option<ExitCode>| {
            exit_request.set(Some(code.unwrap_or(0)));
            Ok(())
        })?,
    )?;

    helpers.set(
        "describe",
        lua.create_function(|_, value: Value| Ok(describe_value(&value)))?,
    )?;

    let base = lua.create_table()?;
    base.set("__index", helpers)?;
    let setmetatable: Function = lua.globals().get("setmetatable")?;
    setmetatable.call::<()>((lua.globals(), base))
}
