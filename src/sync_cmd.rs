use anyhow::Context as _;

use hishtory::crypto::AesGcmCipher;
use hishtory::install::{self, Installer};
use hishtory::shell::RcFileIntegration;
use hishtory::sync::Syncer;
use hishtory::update::{self, Platform, SlsaVerifier, UpdateOutcome, Updater};

use crate::App;

pub fn cmd_init(app: &App, secret: Option<&str>) -> anyhow::Result<i32> {
    let cache = app.cache()?;
    let client = app.client()?;
    let syncer = Syncer {
        config: &app.config,
        cache: &cache,
        client: &client,
        cipher: &AesGcmCipher,
        log: &app.log,
    };
    let report = syncer.setup(secret)?;
    println!("Setup completed with secret {}", report.user_secret);
    if report.bootstrapped > 0 {
        println!("Imported {} entries from other devices", report.bootstrapped);
    }
    Ok(0)
}

pub fn cmd_install(app: &App, secret: Option<&str>) -> anyhow::Result<i32> {
    let cache = app.cache()?;
    let client = app.client()?;
    let syncer = Syncer {
        config: &app.config,
        cache: &cache,
        client: &client,
        cipher: &AesGcmCipher,
        log: &app.log,
    };
    let shell = RcFileIntegration::from_env()?;
    let installer = Installer {
        syncer: &syncer,
        shell: &shell,
        install_path: install::default_install_path()?,
        source: std::env::current_exe().context("failed to locate the running binary")?,
    };
    let report = installer.install(secret)?;

    if report.copied {
        eprintln!("[hishtory] installed {}", report.binary.display());
    }
    if let Some(setup) = report.setup {
        println!("Setup completed with secret {}", setup.user_secret);
    }
    Ok(0)
}

pub fn cmd_update(app: &App) -> anyhow::Result<i32> {
    let client = app.client()?;
    let verifier = SlsaVerifier::release()?;
    let updater = Updater {
        client: &client,
        verifier: &verifier,
        running_version: update::RUNNING_VERSION.to_owned(),
        install_path: install::default_install_path()?,
        scratch_dir: app.config.dir().join(update::SCRATCH_DIR),
        platform: Platform::current(),
    };
    match updater.run()? {
        UpdateOutcome::UpToDate { version } => {
            println!("Latest version ({version}) is already installed");
        }
        UpdateOutcome::Updated { from, to } => {
            println!("Successfully updated hishtory from {from} to {to}");
        }
    }
    Ok(0)
}

pub fn cmd_sync(app: &App) -> anyhow::Result<i32> {
    let cache = app.cache()?;
    let client = app.client()?;
    let syncer = Syncer {
        config: &app.config,
        cache: &cache,
        client: &client,
        cipher: &AesGcmCipher,
        log: &app.log,
    };
    let added = syncer.pull()?;
    println!("Retrieved {added} new entries");
    Ok(0)
}
