//! Shell startup integration.
//!
//! Each supported shell gets a hook script under the hishtory directory
//! (`config.sh`, `config.zsh`) and a block in its rc file that puts the
//! hishtory directory on `PATH` and sources that script. Scripts are rewritten
//! on every install so updates reach existing machines; rc files are only
//! appended to when the `source` line is missing.

use std::path::{Path, PathBuf};

use anyhow::Context as _;

const CONFIG_SH: &str = include_str!("../shell/config.sh");
const CONFIG_ZSH: &str = include_str!("../shell/config.zsh");
const TEST_CONFIG_SH: &str = include_str!("../shell/test_config.sh");
const TEST_CONFIG_ZSH: &str = include_str!("../shell/test_config.zsh");

const RC_MARKER: &str = "# Hishtory Config:";

/// The collaborator `install` uses to wire hishtory into shell startup.
pub trait ShellIntegration {
    /// Write hook scripts and patch rc files. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if any script or rc file cannot be written.
    fn configure(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Bash,
    Zsh,
}

impl Shell {
    pub const ALL: [Self; 2] = [Self::Bash, Self::Zsh];

    pub const fn script_name(self) -> &'static str {
        match self {
            Self::Bash => "config.sh",
            Self::Zsh => "config.zsh",
        }
    }

    pub const fn rc_name(self) -> &'static str {
        match self {
            Self::Bash => ".bashrc",
            Self::Zsh => ".zshrc",
        }
    }

    /// Hook script content. The test variant saves entries synchronously.
    pub const fn script(self, test_mode: bool) -> &'static str {
        match (self, test_mode) {
            (Self::Bash, false) => CONFIG_SH,
            (Self::Bash, true) => TEST_CONFIG_SH,
            (Self::Zsh, false) => CONFIG_ZSH,
            (Self::Zsh, true) => TEST_CONFIG_ZSH,
        }
    }
}

/// Integration that patches `~/.bashrc` and `~/.zshrc`.
#[derive(Debug, Clone)]
pub struct RcFileIntegration {
    home: PathBuf,
    user_dir: PathBuf,
    test_mode: bool,
}

impl RcFileIntegration {
    pub fn new(home: impl Into<PathBuf>, user_dir: impl Into<PathBuf>, test_mode: bool) -> Self {
        Self {
            home: home.into(),
            user_dir: user_dir.into(),
            test_mode,
        }
    }

    /// Resolve paths from the process environment; `HISHTORY_TEST` selects
    /// the test scripts.
    ///
    /// # Errors
    ///
    /// Returns an error if the home or hishtory directory cannot be determined.
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let user_dir = crate::paths::user_dir().context("could not determine hishtory directory")?;
        let test_mode = std::env::var_os("HISHTORY_TEST").is_some_and(|v| !v.is_empty());
        Ok(Self::new(home, user_dir, test_mode))
    }

    pub fn script_path(&self, shell: Shell) -> PathBuf {
        self.user_dir.join(shell.script_name())
    }

    pub fn rc_path(&self, shell: Shell) -> PathBuf {
        self.home.join(shell.rc_name())
    }

    fn rc_block(&self, shell: Shell) -> String {
        format!(
            "\n{RC_MARKER}\nexport PATH=\"$PATH:{}\"\nsource {}\n",
            self.user_dir.display(),
            self.script_path(shell).display()
        )
    }

    fn configure_shell(&self, shell: Shell) -> anyhow::Result<()> {
        let script = self.script_path(shell);
        std::fs::write(&script, shell.script(self.test_mode))
            .with_context(|| format!("failed to write {}", script.display()))?;

        let rc = self.rc_path(shell);
        if is_configured(&rc, &script)? {
            return Ok(());
        }
        append(&rc, &self.rc_block(shell))
            .with_context(|| format!("failed to append to {}", rc.display()))?;
        tracing::debug!("configured {}", rc.display());
        Ok(())
    }
}

impl ShellIntegration for RcFileIntegration {
    fn configure(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.user_dir)
            .with_context(|| format!("failed to create {}", self.user_dir.display()))?;
        for shell in Shell::ALL {
            self.configure_shell(shell)?;
        }
        Ok(())
    }
}

/// An rc file counts as configured once it sources the hook script.
fn is_configured(rc: &Path, script: &Path) -> anyhow::Result<bool> {
    let content = match std::fs::read_to_string(rc) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", rc.display())),
    };
    let source_line = format!("source {}", script.display());
    Ok(content.lines().any(|l| l.trim() == source_line))
}

fn append(path: &Path, text: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    file.write_all(text.as_bytes())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn integration(test_mode: bool) -> (TempDir, RcFileIntegration) {
        let dir = TempDir::new().unwrap();
        let integ = RcFileIntegration::new(dir.path(), dir.path().join(".hishtory"), test_mode);
        (dir, integ)
    }

    #[test]
    fn configure_writes_scripts_and_rc_blocks() {
        let (_dir, integ) = integration(false);
        integ.configure().unwrap();

        for shell in Shell::ALL {
            let script = std::fs::read_to_string(integ.script_path(shell)).unwrap();
            assert_eq!(script, shell.script(false));
            let rc = std::fs::read_to_string(integ.rc_path(shell)).unwrap();
            assert!(rc.contains(RC_MARKER));
            assert!(rc.contains(&format!("source {}", integ.script_path(shell).display())));
        }
    }

    #[test]
    fn configure_is_idempotent() {
        let (_dir, integ) = integration(false);
        integ.configure().unwrap();
        integ.configure().unwrap();
        integ.configure().unwrap();

        let rc = std::fs::read_to_string(integ.rc_path(Shell::Bash)).unwrap();
        assert_eq!(rc.matches(RC_MARKER).count(), 1);
    }

    #[test]
    fn configure_preserves_existing_rc_content() {
        let (_dir, integ) = integration(false);
        std::fs::write(integ.rc_path(Shell::Zsh), "alias ll='ls -l'\n").unwrap();
        integ.configure().unwrap();

        let rc = std::fs::read_to_string(integ.rc_path(Shell::Zsh)).unwrap();
        assert!(rc.starts_with("alias ll='ls -l'\n"));
        assert!(rc.contains(RC_MARKER));
    }

    #[test]
    fn test_mode_selects_synchronous_scripts() {
        let (_dir, integ) = integration(true);
        integ.configure().unwrap();
        let script = std::fs::read_to_string(integ.script_path(Shell::Bash)).unwrap();
        assert_eq!(script, TEST_CONFIG_SH);
        assert_ne!(TEST_CONFIG_SH, CONFIG_SH);
    }

    #[test]
    fn scripts_are_refreshed_on_reinstall() {
        let (_dir, integ) = integration(false);
        integ.configure().unwrap();
        std::fs::write(integ.script_path(Shell::Zsh), "stale").unwrap();
        integ.configure().unwrap();
        let script = std::fs::read_to_string(integ.script_path(Shell::Zsh)).unwrap();
        assert_eq!(script, CONFIG_ZSH);
    }

    #[test]
    fn hook_scripts_invoke_save_history_entry() {
        for shell in Shell::ALL {
            for test_mode in [false, true] {
                assert!(shell.script(test_mode).contains("hishtory saveHistoryEntry"));
            }
        }
    }
}
