use autotest_repl::app::{self, Startup};
use autotest_repl::{Console, ExitCode, LaunchConfig, RustylineReader};
use tracing_subscriber::EnvFilter;

/// Environment variable holding log directives; `RUST_LOG` is the fallback.
const LOG_ENV: &str = "AUTOTEST_REPL_LOG";

fn main() {
    let args: Vec<String> = std::env::args_os()
        .skip(1)
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    let config = LaunchConfig::parse(&args);
    init_tracing(config.verbose);

    let code = match run(&config) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(config: &LaunchConfig) -> anyhow::Result<ExitCode> {
    let initial_input = match app::startup(config, &mut std::io::stdout())? {
        Startup::Exit(code) => return Ok(code),
        Startup::Interactive { initial_input } => initial_input,
    };

    let reader = RustylineReader::new()?;
    Ok(app::run_interactive(
        config,
        &initial_input,
        Console::stdio(),
        Box::new(reader),
    ))
}

// --verbose > AUTOTEST_REPL_LOG > RUST_LOG > "warn"
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug,rustyline=warn")
    } else {
        EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
