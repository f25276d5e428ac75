use anyhow::{Context, Result, bail};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

/// Run a command and inherit stdio (shows output in real-time)
pub fn run(cmd: &str, args: &[String]) -> Result<ExitStatus> {
    Command::new(cmd)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Program and arguments that run `script` from `dir` under bash
pub fn script_command(dir: &Path, script: &str, args: &[&str], sudo: bool) -> (String, Vec<String>) {
    let mut argv = vec![dir.join(script).display().to_string()];
    argv.extend(args.iter().map(ToString::to_string));
    if sudo {
        argv.insert(0, "bash".to_string());
        ("sudo".to_string(), argv)
    } else {
        ("bash".to_string(), argv)
    }
}

/// Run a script from the scripts directory, failing on a non-zero exit
pub fn run_script(dir: &Path, script: &str, args: &[&str], sudo: bool) -> Result<()> {
    let path = dir.join(script);
    if !path.is_file() {
        bail!("Script not found: {}", path.display());
    }
    let (cmd, argv) = script_command(dir, script, args, sudo);
    log::debug!("Running {cmd} {}", argv.join(" "));

    let status = run(&cmd, &argv)?;
    if !status.success() {
        match status.code() {
            Some(code) => bail!("{script} exited with status {code}"),
            None => bail!("{script} was terminated by a signal"),
        }
    }
    Ok(())
}
