//! Domain types made available to scripts under their short names.
//!
//! The engine does not reflect over Rust types. Instead [`DOMAIN_TYPES`] is a
//! fixed table mapping each short name to a constructor table, which the
//! engine installs as a global before any input is evaluated:
//!
//! ```text
//! AutoTestClientSession.new()          -> session handle
//! AppQuery.new():Marked("ok"):Text(..) -> query value
//! AppResult.new{ kind = "Button" }     -> result value
//! ```

use crate::bootstrap::lua_string_literal;
use crate::launcher;
use mlua::{AnyUserData, Lua, MetaMethod, Table, UserData, UserDataFields, UserDataMethods, Variadic};
use std::env;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Child;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming the process `AttachApplication()` connects to.
pub const ATTACH_PID_VAR: &str = "AUTOTEST_ATTACH_PID";

/// Field each imported type table carries with its short name.
pub const TYPE_NAME_KEY: &str = "__typename";

/// A type scripts can reference by its short name.
pub struct ImportedType {
    pub name: &'static str,
    pub summary: &'static str,
    pub members: &'static [&'static str],
    constructor: fn(&Lua) -> mlua::Result<Table>,
}

impl ImportedType {
    /// Build the global table scripts see for this type.
    pub fn create(&self, lua: &Lua) -> mlua::Result<Table> {
        let table = (self.constructor)(lua)?;
        table.raw_set(TYPE_NAME_KEY, self.name)?;
        Ok(table)
    }

    /// Multi-line description shown by `describe`.
    pub fn describe(&self) -> String {
        format!(
            "{}: {}\n  members: {}",
            self.name,
            self.summary,
            self.members.join(", ")
        )
    }
}

impl fmt::Debug for ImportedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportedType").field("name", &self.name).finish()
    }
}

/// Types imported into every engine, in registration order.
pub static DOMAIN_TYPES: [ImportedType; 3] = [
    ImportedType {
        name: ClientSession::TYPE_NAME,
        summary: "connection to the application under test",
        members: &[
            "new()",
            "StartApplication(path, ...)",
            "AttachApplication([pid])",
            "Stop()",
            "IsRunning()",
            "Pid()",
            "ExitCode()",
        ],
        constructor: session_type,
    },
    ImportedType {
        name: AppQuery::TYPE_NAME,
        summary: "selector for elements of the application",
        members: &[
            "new()",
            "Marked(name)",
            "Text(text)",
            "Property(name, value)",
            "Children()",
            "Index(n)",
        ],
        constructor: query_type,
    },
    ImportedType {
        name: AppResult::TYPE_NAME,
        summary: "element returned by a query",
        members: &["new{ kind, id, text, visible }", "Kind", "Id", "Text", "Visible"],
        constructor: result_type,
    },
];

/// Look up an imported type by short name.
pub fn find_type(name: &str) -> Option<&'static ImportedType> {
    DOMAIN_TYPES.iter().find(|ty| ty.name == name)
}

/// Short type name of a domain value, if `value` is one.
pub fn instance_type(value: &AnyUserData) -> Option<&'static str> {
    if value.is::<ClientSession>() {
        Some(ClientSession::TYPE_NAME)
    } else if value.is::<AppQuery>() {
        Some(AppQuery::TYPE_NAME)
    } else if value.is::<AppResult>() {
        Some(AppResult::TYPE_NAME)
    } else {
        None
    }
}

fn session_type(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set("new", lua.create_function(|_, ()| Ok(ClientSession::default()))?)?;
    Ok(table)
}

fn query_type(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set("new", lua.create_function(|_, ()| Ok(AppQuery::default()))?)?;
    Ok(table)
}

fn result_type(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set(
        "new",
        lua.create_function(|_, fields: Option<Table>| match fields {
            Some(fields) => AppResult::from_table(&fields),
            None => Ok(AppResult::default()),
        })?,
    )?;
    Ok(table)
}

/// Failures of session operations, raised to scripts as Lua errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("application not found: {0}")]
    NotFound(String),

    #[error("failed to launch {}: {source}", .path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("an application is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("no application to attach to: pass a pid or set AUTOTEST_ATTACH_PID")]
    NoAttachTarget,

    #[error("invalid pid in AUTOTEST_ATTACH_PID: {0:?}")]
    InvalidPid(String),

    #[error("failed to stop application: {0}")]
    Stop(#[source] io::Error),
}

#[derive(Debug)]
enum Target {
    Launched { path: PathBuf, child: Child },
    Attached { pid: u32 },
}

/// Handle on the application under test.
#[derive(Debug, Default)]
pub struct ClientSession {
    target: Option<Target>,
}

impl ClientSession {
    pub const TYPE_NAME: &'static str = "AutoTestClientSession";

    /// Launch `path` with `args`, resolving bare names through `PATH`.
    pub fn start_application(&mut self, path: &str, args: &[String]) -> Result<u32, SessionError> {
        if let Some(pid) = self.running_pid() {
            return Err(SessionError::AlreadyRunning(pid));
        }

        let search_paths = env::var_os("PATH").unwrap_or_default();
        let resolved = launcher::find_application(&search_paths, Path::new(path))
            .ok_or_else(|| SessionError::NotFound(path.to_string()))?
            .into_owned();

        let child = launcher::spawn_application(&resolved, args).map_err(|source| SessionError::Launch {
            path: resolved.clone(),
            source,
        })?;
        let pid = child.id();
        info!(path = %resolved.display(), pid, "launched application");
        self.target = Some(Target::Launched {
            path: resolved,
            child,
        });
        Ok(pid)
    }

    /// Attach to `pid`, or to the process named by [`ATTACH_PID_VAR`].
    pub fn attach_application(&mut self, pid: Option<u32>) -> Result<u32, SessionError> {
        if let Some(running) = self.running_pid() {
            return Err(SessionError::AlreadyRunning(running));
        }

        let pid = match pid {
            Some(pid) => pid,
            None => {
                let value = env::var(ATTACH_PID_VAR).map_err(|_| SessionError::NoAttachTarget)?;
                value
                    .trim()
                    .parse()
                    .map_err(|_| SessionError::InvalidPid(value.clone()))?
            }
        };
        info!(pid, "attached to application");
        self.target = Some(Target::Attached { pid });
        Ok(pid)
    }

    /// Stop a launched application or detach from an attached one.
    ///
    /// Returns the exit code of a launched application.
    pub fn stop(&mut self) -> Result<Option<i32>, SessionError> {
        match self.target.take() {
            Some(Target::Launched { path, mut child }) => {
                if child.try_wait().map_err(SessionError::Stop)?.is_none() {
                    child.kill().map_err(SessionError::Stop)?;
                }
                let status = child.wait().map_err(SessionError::Stop)?;
                debug!(path = %path.display(), "stopped application");
                Ok(Some(launcher::exit_code(status)))
            }
            Some(Target::Attached { pid }) => {
                debug!(pid, "detached from application");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.running_pid().is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        match &self.target {
            Some(Target::Launched { child, .. }) => Some(child.id()),
            Some(Target::Attached { pid }) => Some(*pid),
            None => None,
        }
    }

    /// Exit code of a launched application that has finished.
    pub fn exit_code(&mut self) -> Option<i32> {
        match &mut self.target {
            Some(Target::Launched { child, .. }) => {
                child.try_wait().ok().flatten().map(launcher::exit_code)
            }
            _ => None,
        }
    }

    fn running_pid(&mut self) -> Option<u32> {
        match &mut self.target {
            Some(Target::Launched { child, .. }) => match child.try_wait() {
                Ok(None) => Some(child.id()),
                _ => None,
            },
            Some(Target::Attached { pid }) => Some(*pid),
            None => None,
        }
    }
}

impl fmt::Display for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(Target::Launched { path, child }) => write!(
                f,
                "{}(launched {}, pid {})",
                Self::TYPE_NAME,
                path.display(),
                child.id()
            ),
            Some(Target::Attached { pid }) => write!(f, "{}(attached, pid {pid})", Self::TYPE_NAME),
            None => write!(f, "{}(not connected)", Self::TYPE_NAME),
        }
    }
}

impl UserData for ClientSession {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method_mut(
            "StartApplication",
            |_, this, (path, args): (String, Variadic<String>)| {
                this.start_application(&path, &args)
                    .map_err(mlua::Error::external)
            },
        );
        methods.add_method_mut("AttachApplication", |_, this, pid: Option<u32>| {
            this.attach_application(pid).map_err(mlua::Error::external)
        });
        methods.add_method_mut("Stop", |_, this, ()| {
            this.stop().map_err(mlua::Error::external)
        });
        methods.add_method_mut("IsRunning", |_, this, ()| Ok(this.is_running()));
        methods.add_method("Pid", |_, this, ()| Ok(this.pid()));
        methods.add_method_mut("ExitCode", |_, this, ()| Ok(this.exit_code()));
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.to_string()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryStep {
    Marked(String),
    Text(String),
    Property(String, String),
    Children,
    Index(i64),
}

/// Immutable element selector. Every refinement returns a new query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppQuery {
    steps: Vec<QueryStep>,
}

impl AppQuery {
    pub const TYPE_NAME: &'static str = "AppQuery";

    fn with(&self, step: QueryStep) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    pub fn marked(&self, name: impl Into<String>) -> Self {
        self.with(QueryStep::Marked(name.into()))
    }

    pub fn text(&self, text: impl Into<String>) -> Self {
        self.with(QueryStep::Text(text.into()))
    }

    pub fn property(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(QueryStep::Property(name.into(), value.into()))
    }

    pub fn children(&self) -> Self {
        self.with(QueryStep::Children)
    }

    pub fn index(&self, index: i64) -> Self {
        self.with(QueryStep::Index(index))
    }
}

impl fmt::Display for AppQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c => c")?;
        for step in &self.steps {
            match step {
                QueryStep::Marked(name) => write!(f, ".Marked({})", lua_string_literal(name))?,
                QueryStep::Text(text) => write!(f, ".Text({})", lua_string_literal(text))?,
                QueryStep::Property(name, value) => write!(
                    f,
                    ".Property({}, {})",
                    lua_string_literal(name),
                    lua_string_literal(value)
                )?,
                QueryStep::Children => write!(f, ".Children()")?,
                QueryStep::Index(index) => write!(f, ".Index({index})")?,
            }
        }
        Ok(())
    }
}

impl UserData for AppQuery {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("Marked", |_, this, name: String| Ok(this.marked(name)));
        methods.add_method("Text", |_, this, text: String| Ok(this.text(text)));
        methods.add_method("Property", |_, this, (name, value): (String, String)| {
            Ok(this.property(name, value))
        });
        methods.add_method("Children", |_, this, ()| Ok(this.children()));
        methods.add_method("Index", |_, this, index: i64| Ok(this.index(index)));
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.to_string()));
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: AnyUserData| {
            Ok(other
                .borrow::<AppQuery>()
                .map(|other| *this == *other)
                .unwrap_or(false))
        });
    }
}

/// Element of the application as reported by a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppResult {
    pub kind: String,
    pub id: Option<String>,
    pub text: Option<String>,
    pub visible: bool,
}

impl Default for AppResult {
    fn default() -> Self {
        Self {
            kind: "Widget".to_string(),
            id: None,
            text: None,
            visible: true,
        }
    }
}

impl AppResult {
    pub const TYPE_NAME: &'static str = "AppResult";

    fn from_table(fields: &Table) -> mlua::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            kind: fields.get::<Option<String>>("kind")?.unwrap_or(defaults.kind),
            id: fields.get("id")?,
            text: fields.get("text")?,
            visible: fields.get::<Option<bool>>("visible")?.unwrap_or(defaults.visible),
        })
    }
}

impl fmt::Display for AppResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(Kind={}", Self::TYPE_NAME, self.kind)?;
        if let Some(id) = &self.id {
            write!(f, ", Id={}", lua_string_literal(id))?;
        }
        if let Some(text) = &self.text {
            write!(f, ", Text={}", lua_string_literal(text))?;
        }
        write!(f, ", Visible={})", self.visible)
    }
}

impl UserData for AppResult {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("Kind", |_, this| Ok(this.kind.clone()));
        fields.add_field_method_get("Id", |_, this| Ok(this.id.clone()));
        fields.add_field_method_get("Text", |_, this| Ok(this.text.clone()));
        fields.add_field_method_get("Visible", |_, this| Ok(this.visible));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.to_string()));
    }
}
