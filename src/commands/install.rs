//! Install packages onto the shared filesystem
//!
//! Mounts the filesystem with `mount_efs.sh`, then runs the package
//! manager's install script against it. Both scripts take the filesystem id
//! as their only argument.

use anyhow::{Result, bail};

use crate::Context;
use crate::cli::PackageManager;
use crate::config::NuageConfig;
use crate::runner;
use crate::ui;

const MOUNT_SCRIPT: &str = "mount_efs.sh";

pub fn run(ctx: &Context, manager: PackageManager, filesystem_id: &str) -> Result<()> {
    validate_filesystem_id(filesystem_id)?;
    let config = NuageConfig::load(&ctx.config)?;
    let dir = config.scripts_dir();
    let sudo = config.scripts.sudo;

    if sudo && !runner::command_exists("sudo") {
        bail!("sudo not found; set scripts.sudo = false in the config to run without it");
    }

    ui::header(&format!("Installing {} packages", format!("{manager:?}").to_lowercase()));
    ui::kv("Filesystem", filesystem_id);
    ui::kv("Scripts", &dir.display().to_string());

    for (i, script) in [MOUNT_SCRIPT, manager.script()].iter().enumerate() {
        if !ctx.quiet {
            ui::step(i + 1, 2, script);
        }
        runner::run_script(&dir, script, &[filesystem_id], sudo)?;
    }

    ui::success("Packages installed");
    Ok(())
}

/// The id is handed to the scripts as is; it only has to be present
fn validate_filesystem_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("Filesystem id must not be empty");
    }
    Ok(())
}
