//! Preflight checks run before a download touches the file system.
//!
//! These fail fast with a descriptive message instead of letting every track
//! fail the same way inside the pipeline.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// Checks that `program` can be executed by running it with `version_arg`.
pub fn check_tool(program: &str, version_arg: &str) -> Result<()> {
    let status = Command::new(program)
        .arg(version_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => bail!(
            "Preflight check failed: '{} {}' exited with {}",
            program,
            version_arg,
            status
        ),
        Err(e) => bail!(
            "Preflight check failed: '{}' is not installed or not in the PATH ({})",
            program,
            e
        ),
    }
}

/// Validates the destination and creates it if needed.
///
/// Checks:
/// - Destination must not be an existing regular file
/// - Destination (and parents) must be creatable
pub fn prepare_destination(dest: &Path) -> Result<()> {
    if dest.is_file() {
        bail!(
            "Safety check failed: destination '{}' is a file, not a directory",
            dest.display()
        );
    }
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create destination '{}'", dest.display()))
}
