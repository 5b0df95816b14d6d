use autotest_repl::app::{self, OPTION_ERROR_EXIT_CODE, Startup};
use autotest_repl::{Console, LaunchConfig, ScriptedLines};
use std::cell::RefCell;
use std::rc::Rc;

fn start(args: &[&str]) -> (LaunchConfig, Startup, String) {
    let config = LaunchConfig::parse(args);
    let mut out = Vec::new();
    let startup = app::startup(&config, &mut out).unwrap();
    (config, startup, String::from_utf8(out).unwrap())
}

fn initial_input(startup: Startup) -> String {
    match startup {
        Startup::Interactive { initial_input } => initial_input,
        other => panic!("expected an interactive startup, got {other:?}"),
    }
}

fn captured(handle: &Rc<RefCell<Vec<u8>>>) -> String {
    String::from_utf8(handle.borrow().clone()).unwrap()
}

#[test]
fn no_arguments_print_help_and_exit_zero() {
    let (_, startup, out) = start(&[]);
    assert_eq!(startup, Startup::Exit(0));
    assert!(out.contains("--file"), "{out}");
    assert!(out.contains("--attach"), "{out}");
}

#[test]
fn file_argument_launches_target() {
    let (config, startup, out) = start(&["--file=/tmp/App"]);
    assert!(out.is_empty(), "{out}");
    assert!(!config.attach);

    let input = initial_input(startup);
    assert!(input.contains("StartApplication(\"/tmp/App\")"), "{input}");
}

#[test]
fn attach_argument_attaches_without_path() {
    let (config, startup, _) = start(&["--attach", "--file=/tmp/App"]);
    assert!(config.attach);

    let input = initial_input(startup);
    assert!(input.contains("AttachApplication()"), "{input}");
    assert!(!input.contains("/tmp/App"), "{input}");
}

#[test]
fn empty_file_value_is_an_option_error() {
    let (_, startup, out) = start(&["--file="]);
    assert_eq!(startup, Startup::Exit(OPTION_ERROR_EXIT_CODE));
    assert!(out.contains("--file argument is required"), "{out}");
}

#[test]
fn failed_priming_still_reaches_interactive_loop() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("MissingApp");
    let target = target.to_string_lossy();

    let (config, startup, _) = start(&["--file", &target]);
    let input = initial_input(startup);

    let (console, out, err) = Console::memory();
    let reader = ScriptedLines::new(["app:IsRunning()", "AppQuery.new():Marked('ok')"]);
    let code = app::run_interactive(&config, &input, console, Box::new(reader));

    assert_eq!(code, 0);
    let err = captured(&err);
    assert!(err.contains("application not found"), "{err}");
    assert!(err.contains("MissingApp"), "{err}");
    let out = captured(&out);
    assert!(out.starts_with("false\n"), "{out}");
    assert!(out.contains("Marked(\"ok\")"), "{out}");
}

#[test]
fn modules_next_to_target_are_requirable() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("helpers.lua"),
        "return { greet = function() return 'hi' end }",
    )
    .unwrap();
    let target = dir.path().join("App");
    let target = target.to_string_lossy();

    let (config, startup, _) = start(&["-f", &target]);
    let input = initial_input(startup);

    let (console, out, _) = Console::memory();
    let reader = ScriptedLines::new(["require('helpers').greet()", "quit(4)"]);
    let code = app::run_interactive(&config, &input, console, Box::new(reader));

    assert_eq!(code, 4);
    assert_eq!(captured(&out), "\"hi\"\n");
}
