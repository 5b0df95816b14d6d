use crate::bootstrap::build_initial_input;
use crate::engine::{Engine, EngineConfig};
use crate::io_adapters::Console;
use crate::options::LaunchConfig;
use crate::resolver::LibraryResolver;
use crate::shell::{ExitCode, LineReader, Shell};
use std::io::{self, Write};
use tracing::{debug, error};

/// Exit code for an invalid command line.
pub const OPTION_ERROR_EXIT_CODE: ExitCode = -1;

/// What to do after the command line has been parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Startup {
    /// Finish immediately with the given code.
    Exit(ExitCode),
    /// Prime the engine with `initial_input` and hand over to the user.
    Interactive { initial_input: String },
}

/// Handle help and option errors; otherwise produce the bootstrap input.
///
/// Help wins over errors, so `--bogus --help` still prints usage.
pub fn startup(config: &LaunchConfig, out: &mut dyn Write) -> io::Result<Startup> {
    if config.show_help {
        config.write_help(out)?;
        return Ok(Startup::Exit(0));
    }
    if config.has_error() {
        config.write_error(out)?;
        return Ok(Startup::Exit(OPTION_ERROR_EXIT_CODE));
    }

    let initial_input = build_initial_input(config);
    debug!(%initial_input, "bootstrap input prepared");
    Ok(Startup::Interactive { initial_input })
}

/// Configure the engine for `config` and run the shell until it exits.
pub fn run_interactive(
    config: &LaunchConfig,
    initial_input: &str,
    console: Console,
    reader: Box<dyn LineReader>,
) -> ExitCode {
    let resolver = LibraryResolver::for_target(&config.target_path);
    let engine = match Engine::new(EngineConfig::default(), Some(resolver), console.clone()) {
        Ok(engine) => engine,
        Err(err) => {
            error!(error = %err, "failed to configure engine");
            if let Err(write_err) = console.write_err(&format!("Error: {err}\n")) {
                error!(error = %write_err, "failed to report engine error");
            }
            return 1;
        }
    };

    Shell::new(engine, reader, console).run(Some(initial_input))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn startup_output(args: &[&str]) -> (Startup, String) {
        let config = LaunchConfig::parse(args);
        let mut out = Vec::new();
        let startup = startup(&config, &mut out).unwrap();
        (startup, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_no_arguments_shows_help() {
        let (startup, out) = startup_output(&[]);
        assert_eq!(startup, Startup::Exit(0));
        assert!(out.contains("--file"), "{out}");
    }

    #[test]
    fn test_help_wins_over_errors() {
        let (startup, out) = startup_output(&["--bogus", "-h"]);
        assert_eq!(startup, Startup::Exit(0));
        assert!(!out.contains("ERROR"), "{out}");
    }

    #[test]
    fn test_option_error_exits_with_minus_one() {
        let (startup, out) = startup_output(&["--attach"]);
        assert_eq!(startup, Startup::Exit(OPTION_ERROR_EXIT_CODE));
        assert!(out.starts_with("ERROR: "), "{out}");
    }

    #[test]
    fn test_valid_options_produce_bootstrap_input() {
        let (startup, out) = startup_output(&["-f", "/opt/App"]);
        assert!(out.is_empty());
        match startup {
            Startup::Interactive { initial_input } => {
                assert!(initial_input.contains("StartApplication(\"/opt/App\")"));
            }
            other => panic!("unexpected startup: {other:?}"),
        }
    }
}
