//! Generates the statement that primes a fresh engine with a client session.

use crate::automation::ClientSession;
use crate::options::LaunchConfig;

/// Global the bootstrap statement stores the session in.
pub const SESSION_GLOBAL: &str = "app";

/// Build the bootstrap statement for `config`.
///
/// Attach mode calls `AttachApplication()` without arguments; otherwise the
/// target path is passed to `StartApplication` as an escaped string literal.
pub fn build_initial_input(config: &LaunchConfig) -> String {
    let session = format!("{SESSION_GLOBAL} = {}.new()", ClientSession::TYPE_NAME);
    if config.attach {
        format!("{session}; {SESSION_GLOBAL}:AttachApplication()")
    } else {
        format!(
            "{session}; {SESSION_GLOBAL}:StartApplication({})",
            lua_string_literal(&config.target_path)
        )
    }
}

/// Quote `value` as a double-quoted Lua string literal.
///
/// Control characters without a short escape are written as three-digit
/// decimal escapes so a following digit can never extend them.
pub fn lua_string_literal(value: &str) -> String {
    let mut literal = String::with_capacity(value.len() + 2);
    literal.push('"');
    for c in value.chars() {
        match c {
            '\\' => literal.push_str("\\\\"),
            '"' => literal.push_str("\\\""),
            '\n' => literal.push_str("\\n"),
            '\r' => literal.push_str("\\r"),
            '\t' => literal.push_str("\\t"),
            c if c.is_ascii_control() => literal.push_str(&format!("\\{:03}", c as u32)),
            c => literal.push(c),
        }
    }
    literal.push('"');
    literal
}
