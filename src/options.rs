use argh::{EarlyExit, FromArgs};
use std::io::{self, Write};
use thiserror::Error;

/// Name the shell reports itself as in usage text.
pub const PROGRAM_NAME: &str = "autotest-repl";

/// Problems found while interpreting the command line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    /// The argument parser rejected the input (unknown flag, missing value).
    #[error("{0}")]
    Parse(String),

    /// No application path was supplied.
    #[error("--file argument is required")]
    MissingFile,
}

#[derive(FromArgs, Debug)]
/// Interactive Lua shell for driving an application under test.
/// `-?` and `-h` are accepted as aliases for `--help`.
struct LaunchArgs {
    #[argh(switch, short = 'a')]
    /// attach to an already running application instead of launching one
    attach: bool,

    #[argh(option, short = 'f')]
    /// path to the application under test, also accepted as --file=PATH
    file: Option<String>,

    #[argh(switch, short = 'v')]
    /// log engine and library resolution activity to stderr
    verbose: bool,

    #[argh(positional)]
    /// extra arguments, kept for the session
    remaining: Vec<String>,
}

/// Launch configuration built once from the process arguments.
///
/// Exactly one of three outcomes is effective: help was requested,
/// [`error`](Self::error) is set, or the configuration is runnable, in which
/// case [`target_path`](Self::target_path) is never empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Usage text was requested, explicitly or by passing no arguments.
    pub show_help: bool,
    /// Attach to a running target instead of launching a new one.
    pub attach: bool,
    /// Path of the application under test. Empty when not supplied.
    pub target_path: String,
    /// Positional arguments the shell does not interpret itself.
    pub remaining_args: Vec<String>,
    /// Debug logging was requested.
    pub verbose: bool,
    /// First problem found while parsing, if any.
    pub error: Option<OptionsError>,
}

impl LaunchConfig {
    /// Parse process arguments (without the program name).
    ///
    /// Never fails: parse problems are recorded in [`error`](Self::error) and
    /// whatever could be understood is still filled in.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Self {
        let mut config = LaunchConfig::default();

        if args.is_empty() {
            config.show_help = true;
            return config;
        }

        let normalized = normalize(args);
        let argv: Vec<&str> = normalized.argv.iter().map(String::as_str).collect();
        match LaunchArgs::from_args(&[PROGRAM_NAME], &argv) {
            Ok(parsed) => {
                config.attach = parsed.attach;
                config.target_path = parsed.file.unwrap_or_default();
                config.verbose = parsed.verbose;
                config.remaining_args = parsed.remaining;
            }
            Err(EarlyExit { status: Ok(()), .. }) => config.show_help = true,
            Err(EarlyExit {
                output,
                status: Err(()),
            }) => {
                salvage(&argv, &mut config);
                config.error = Some(OptionsError::Parse(output.trim().to_string()));
            }
        }
        config.show_help |= normalized.help;
        if config.error.is_none() {
            config.error = normalized.error;
        }

        if !config.show_help && config.error.is_none() && config.target_path.is_empty() {
            config.error = Some(OptionsError::MissingFile);
        }

        config
    }

    /// Whether parsing or validation failed.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Write the flag table.
    pub fn write_help(&self, out: &mut dyn Write) -> io::Result<()> {
        let usage = LaunchArgs::from_args(&[PROGRAM_NAME], &["--help"])
            .err()
            .map(|exit| exit.output)
            .unwrap_or_default();
        write!(out, "{usage}")?;
        if !usage.ends_with('\n') {
            writeln!(out)?;
        }
        Ok(())
    }

    /// Write the recorded error and a hint to ask for help. Writes nothing
    /// when there is no error.
    pub fn write_error(&self, out: &mut dyn Write) -> io::Result<()> {
        let Some(error) = &self.error else {
            return Ok(());
        };
        writeln!(out, "ERROR: {error}")?;
        writeln!(out, "Pass --help for usage information.")
    }
}

/// Arguments rearranged for `argh`.
struct Normalized {
    /// Flags first, then `--` and every positional argument.
    argv: Vec<String>,
    /// `-h`, `-?` or `--help` appeared outside an option value.
    help: bool,
    error: Option<OptionsError>,
}

/// Rewrite the accepted flag spellings into the form `argh` understands.
///
/// Help triggers are taken out, so a bare `help` positional stays a
/// positional. Only the last `--file` value is kept, and the argument after
/// `-f`/`--file` is always its value, even when it looks like a flag.
fn normalize<S: AsRef<str>>(args: &[S]) -> Normalized {
    let mut flags = Vec::with_capacity(args.len() + 1);
    let mut positionals = Vec::new();
    let mut file = None;
    let mut help = false;
    let mut error = None;

    let mut iter = args.iter().map(AsRef::as_ref);
    while let Some(arg) = iter.next() {
        match arg {
            "--" => {
                positionals.extend(iter.by_ref().map(str::to_string));
                break;
            }
            "-h" | "-?" | "--help" => help = true,
            "-f" | "--file" => match iter.next() {
                Some(value) => file = Some(value.to_string()),
                None => {
                    error = Some(OptionsError::Parse(format!(
                        "No value provided for option '{arg}'."
                    )))
                }
            },
            _ => match inline_file_value(arg) {
                Some(value) => file = Some(value.to_string()),
                None if arg.len() > 1 && arg.starts_with('-') => flags.push(arg.to_string()),
                None => positionals.push(arg.to_string()),
            },
        }
    }

    if let Some(value) = file {
        flags.push("--file".to_string());
        flags.push(value);
    }
    flags.push("--".to_string());
    flags.extend(positionals);

    Normalized {
        argv: flags,
        help,
        error,
    }
}

/// Value of `--file=PATH`, `--file:PATH`, `-f=PATH`, `-f:PATH` or the
/// bundled `-fPATH`.
fn inline_file_value(arg: &str) -> Option<&str> {
    if let Some(rest) = arg.strip_prefix("--file") {
        return rest.strip_prefix('=').or_else(|| rest.strip_prefix(':'));
    }
    let rest = arg.strip_prefix("-f").filter(|rest| !rest.is_empty())?;
    Some(
        rest.strip_prefix('=')
            .or_else(|| rest.strip_prefix(':'))
            .unwrap_or(rest),
    )
}

/// Pick up recognizable flags after `argh` gave up on the argument list.
fn salvage(argv: &[&str], config: &mut LaunchConfig) {
    let mut iter = argv.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "--" => break,
            "-a" | "--attach" => config.attach = true,
            "-v" | "--verbose" => config.verbose = true,
            "-f" | "--file" => {
                if let Some(value) = iter.next() {
                    config.target_path = value.to_string();
                }
            }
            _ => {}
        }
    }
}
