use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::shell::ShellIntegration;
use crate::sync::{SetupReport, Syncer};

/// What [`Installer::install`] did.
#[derive(Debug)]
pub struct InstallReport {
    pub binary: PathBuf,
    /// `false` when the running executable already is the installed binary.
    pub copied: bool,
    /// `Some` only when this run performed first-time setup.
    pub setup: Option<SetupReport>,
}

/// Places the binary, wires up shells and sets the device up if needed.
pub struct Installer<'a> {
    pub syncer: &'a Syncer<'a>,
    pub shell: &'a dyn ShellIntegration,
    /// Where the binary should live.
    pub install_path: PathBuf,
    /// The executable being installed (normally `current_exe`).
    pub source: PathBuf,
}

/// An existing `hishtory` on `PATH` wins, otherwise `~/.hishtory/hishtory`.
///
/// # Errors
///
/// Returns an error if nothing is on `PATH` and the hishtory directory cannot
/// be determined.
pub fn default_install_path() -> anyhow::Result<PathBuf> {
    if let Ok(found) = which::which(crate::paths::BINARY_FILE) {
        return Ok(found);
    }
    crate::paths::installed_binary_path().context("could not determine hishtory directory")
}

impl Installer<'_> {
    /// Install hishtory on this machine. Safe to re-run.
    ///
    /// `secret` is only used when no config exists yet; an installed device
    /// keeps its config and local cache untouched.
    ///
    /// # Errors
    ///
    /// Fails if the binary cannot be placed, shells cannot be configured, the
    /// existing config is unreadable, or first-time setup fails.
    pub fn install(&self, secret: Option<&str>) -> anyhow::Result<InstallReport> {
        let copied = place_binary(&self.source, &self.install_path)?;
        self.shell
            .configure()
            .context("failed to configure shell integration")?;

        let setup = match self.syncer.config.get() {
            Ok(_) => {
                if secret.is_some() {
                    tracing::warn!("hishtory is already set up; ignoring the supplied secret");
                }
                None
            }
            Err(e) if e.is_not_found() => Some(self.syncer.setup(secret)?),
            Err(e) => return Err(e).context("failed to read existing config"),
        };

        Ok(InstallReport {
            binary: self.install_path.clone(),
            copied,
            setup,
        })
    }
}

/// Copy `source` to `target` unless they are already the same file.
fn place_binary(source: &Path, target: &Path) -> anyhow::Result<bool> {
    if same_file(source, target) {
        return Ok(false);
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    crate::fs::replace_binary(source, target).with_context(|| {
        format!(
            "failed to copy {} to {}",
            source.display(),
            target.display()
        )
    })?;
    Ok(true)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
