use std::borrow::Cow;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

/// Locate the application to launch the way a typical shell would.
///
/// - Absolute path: returned if it exists.
/// - `./app`, or any relative path on non-Unix platforms: returned if it exists.
/// - Relative path with several components (`bin/app`): returned if it exists.
/// - Single component: looked up in each directory of `search_paths` (PATH).
/// - Empty path: never found.
pub(crate) fn find_application<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return existing(path).map(Cow::Borrowed);
    }

    let search_in_current_dir = cfg!(not(unix)) || path.starts_with("./");
    if search_in_current_dir && path.exists() {
        return Some(Cow::Borrowed(path));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, None) => None,
        (Some(single), None) => find_in_path(search_paths, single.as_os_str()).map(Cow::Owned),
        _ => existing(path).map(Cow::Borrowed),
    }
}

/// Spawn the application with its own stdout/stderr and no stdin, so it
/// never competes with the shell for input.
pub(crate) fn spawn_application(path: &Path, args: &[String]) -> io::Result<Child> {
    Command::new(path)
        .args(args)
        .stdin(Stdio::null())
        .spawn()
}

/// Shell-style exit code for a finished application.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => terminated_by_signal(status),
    }
}

#[cfg(unix)]
fn terminated_by_signal(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
        128 + signal
    } else if status.core_dumped() {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_status: ExitStatus) -> i32 {
    -1
}

fn find_in_path(search_paths: &OsStr, name: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.exists())
}

fn existing(path: &Path) -> Option<&Path> {
    path.exists().then_some(path)
}
