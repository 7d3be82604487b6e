#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::significant_drop_tightening
)]

use std::sync::Arc;

use hishtory::config::ConfigStore;
use hishtory::crypto::AesGcmCipher;
use hishtory::history::LocalCache;
use hishtory::install::Installer;
use hishtory::logging::LogSink;
use hishtory::remote::SyncClient;
use hishtory::shell::{RcFileIntegration, Shell};
use hishtory::sync::Syncer;
use mockito::Matcher;
use tempfile::TempDir;

#[test]
fn first_install_sets_up_and_reinstall_does_not() {
    let mut server = mockito::Server::new();
    let register = server
        .mock("GET", "/api/v1/eregister")
        .match_query(Matcher::Any)
        .with_status(200)
        .expect(1)
        .create();
    let bootstrap = server
        .mock("GET", "/api/v1/ebootstrap")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("[]")
        .expect(1)
        .create();

    let home = TempDir::new().unwrap();
    let user_dir = home.path().join(".hishtory");
    let log = Arc::new(LogSink::disabled());
    let config = ConfigStore::new(&user_dir);
    let cache = LocalCache::open(&user_dir.join(".hishtory.db"), log.clone()).unwrap();
    let client = SyncClient::with_base_url(&server.url(), log.clone()).unwrap();
    let syncer = Syncer {
        config: &config,
        cache: &cache,
        client: &client,
        cipher: &AesGcmCipher,
        log: &log,
    };
    let shell = RcFileIntegration::new(home.path(), &user_dir, true);

    let source = home.path().join("download/hishtory");
    std::fs::create_dir_all(source.parent().unwrap()).unwrap();
    std::fs::write(&source, b"binary").unwrap();
    let installer = Installer {
        syncer: &syncer,
        shell: &shell,
        install_path: user_dir.join("hishtory"),
        source,
    };

    let first = installer.install(Some("shared-secret")).unwrap();
    let setup = first.setup.expect("first install runs setup");
    assert_eq!(setup.user_secret, "shared-secret");
    assert!(first.copied);
    assert_eq!(std::fs::read(user_dir.join("hishtory")).unwrap(), b"binary");

    let second = installer.install(None).unwrap();
    assert!(second.setup.is_none());
    assert_eq!(config.get().unwrap().user_secret, "shared-secret");

    for shell_kind in Shell::ALL {
        let rc = std::fs::read_to_string(shell.rc_path(shell_kind)).unwrap();
        assert_eq!(rc.matches("# Hishtory Config:").count(), 1, "{rc}");
    }
    register.assert();
    bootstrap.assert();
}

#[test]
fn install_fails_when_setup_cannot_reach_server() {
    let home = TempDir::new().unwrap();
    let user_dir = home.path().join(".hishtory");
    let log = Arc::new(LogSink::disabled());
    let config = ConfigStore::new(&user_dir);
    let cache = LocalCache::open(&user_dir.join(".hishtory.db"), log.clone()).unwrap();
    let client = SyncClient::with_base_url("http://127.0.0.1:1", log.clone()).unwrap();
    let syncer = Syncer {
        config: &config,
        cache: &cache,
        client: &client,
        cipher: &AesGcmCipher,
        log: &log,
    };
    let shell = RcFileIntegration::new(home.path(), &user_dir, true);
    let source = home.path().join("hishtory-src");
    std::fs::write(&source, b"binary").unwrap();
    let installer = Installer {
        syncer: &syncer,
        shell: &shell,
        install_path: user_dir.join("hishtory"),
        source,
    };

    let err = installer.install(None).unwrap_err();
    assert!(format!("{err:#}").contains("register"), "{err:#}");
}
