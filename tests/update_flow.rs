#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::significant_drop_tightening
)]

use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signer as _, SigningKey};
use hishtory::error::UpdateError;
use hishtory::logging::LogSink;
use hishtory::remote::SyncClient;
use hishtory::update::{
    Platform, RUNNING_VERSION, SlsaVerifier, UpdateCheck, UpdateOutcome, Updater,
    pre_auth_encoding,
};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

const NEW_VERSION: &str = "v9.9.9";
const PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

fn release_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

/// A DSSE envelope attesting `binary` as `version` for linux/amd64, signed by
/// `key` when given.
fn attestation_signed_by(key: Option<&SigningKey>, binary: &[u8], version: &str) -> String {
    let statement = serde_json::json!({
        "_type": "https://in-toto.io/Statement/v0.1",
        "subject": [{
            "name": format!("hishtory-{version}-linux-amd64"),
            "digest": { "sha256": hex::encode(Sha256::digest(binary)) }
        }],
        "predicateType": "https://slsa.dev/provenance/v0.2"
    })
    .to_string();
    let signatures: Vec<_> = key
        .map(|k| {
            let sig = k.sign(&pre_auth_encoding(PAYLOAD_TYPE, statement.as_bytes()));
            serde_json::json!({ "keyid": "", "sig": BASE64.encode(sig.to_bytes()) })
        })
        .into_iter()
        .collect();
    let envelope = serde_json::json!({
        "payloadType": PAYLOAD_TYPE,
        "payload": BASE64.encode(&statement),
        "signatures": signatures
    });
    format!("{envelope}\n")
}

fn attestation(binary: &[u8], version: &str) -> String {
    attestation_signed_by(Some(&release_key()), binary, version)
}

fn update_info(server: &mockito::Server, version: &str) -> String {
    serde_json::json!({
        "version": version,
        "linux_amd_64_url": format!("{}/release/hishtory-linux-amd64", server.url()),
        "linux_amd_64_attestation_url": format!("{}/release/hishtory-linux-amd64.intoto.jsonl", server.url()),
    })
    .to_string()
}

struct Fixture {
    dir: TempDir,
    client: SyncClient,
    verifier: SlsaVerifier,
    installed: PathBuf,
}

impl Fixture {
    fn new(server: &mockito::Server) -> Self {
        let dir = TempDir::new().unwrap();
        let client =
            SyncClient::with_base_url(&server.url(), Arc::new(LogSink::disabled())).unwrap();
        let installed = dir.path().join("hishtory");
        std::fs::write(&installed, b"old binary").unwrap();
        Self {
            dir,
            client,
            verifier: SlsaVerifier::new(vec![release_key().verifying_key()]),
            installed,
        }
    }

    fn updater(&self) -> Updater<'_> {
        Updater {
            client: &self.client,
            verifier: &self.verifier,
            running_version: RUNNING_VERSION.to_owned(),
            install_path: self.installed.clone(),
            scratch_dir: self.dir.path().join("scratch"),
            platform: Platform::new("linux", "amd64"),
        }
    }
}

fn mock_release(
    server: &mut mockito::Server,
    binary: &[u8],
    attestation: &str,
    hits: usize,
) -> (mockito::Mock, mockito::Mock) {
    let bin = server
        .mock("GET", "/release/hishtory-linux-amd64")
        .with_status(200)
        .with_body(binary)
        .expect(hits)
        .create();
    let att = server
        .mock("GET", "/release/hishtory-linux-amd64.intoto.jsonl")
        .with_status(200)
        .with_body(attestation)
        .expect(hits)
        .create();
    (bin, att)
}

#[test]
fn same_version_short_circuits_without_downloads() {
    let mut server = mockito::Server::new();
    let info = update_info(&server, RUNNING_VERSION);
    let _info = server
        .mock("GET", "/api/v1/download")
        .with_status(200)
        .with_body(info)
        .create();
    let (bin, att) = mock_release(&mut server, b"unused", "", 0);

    let fx = Fixture::new(&server);
    let outcome = fx.updater().run().unwrap();

    assert_eq!(
        outcome,
        UpdateOutcome::UpToDate {
            version: RUNNING_VERSION.to_owned()
        }
    );
    bin.assert();
    att.assert();
    assert_eq!(std::fs::read(&fx.installed).unwrap(), b"old binary");
}

#[test]
fn version_comparison_is_exact() {
    let mut server = mockito::Server::new();
    // Semantically older but textually different: still an update.
    let info = update_info(&server, "v0.0.0");
    let _info = server
        .mock("GET", "/api/v1/download")
        .with_status(200)
        .with_body(info)
        .create();

    let fx = Fixture::new(&server);
    match fx.updater().check().unwrap() {
        UpdateCheck::NeedsDownload(info) => assert_eq!(info.version, "v0.0.0"),
        other => panic!("expected NeedsDownload, got {other:?}"),
    }
}

#[test]
fn verification_failure_leaves_installed_binary_untouched() {
    let mut server = mockito::Server::new();
    let info = update_info(&server, NEW_VERSION);
    let _info = server
        .mock("GET", "/api/v1/download")
        .with_status(200)
        .with_body(info)
        .create();
    let (_bin, _att) = mock_release(
        &mut server,
        b"tampered binary",
        &attestation(b"genuine binary", NEW_VERSION),
        1,
    );

    let fx = Fixture::new(&server);
    let err = fx.updater().run().unwrap_err();

    assert!(matches!(err, UpdateError::VerificationFailure(_)), "{err:?}");
    assert_eq!(std::fs::read(&fx.installed).unwrap(), b"old binary");
    assert!(!fx.dir.path().join("scratch/hishtory-client").exists());
}

fn assert_attestation_rejected(binary: &[u8], attestation: &str) {
    let mut server = mockito::Server::new();
    let info = update_info(&server, NEW_VERSION);
    let _info = server
        .mock("GET", "/api/v1/download")
        .with_status(200)
        .with_body(info)
        .create();
    let (_bin, _att) = mock_release(&mut server, binary, attestation, 1);

    let fx = Fixture::new(&server);
    let err = fx.updater().run().unwrap_err();
    assert!(matches!(err, UpdateError::VerificationFailure(_)), "{err:?}");
    assert_eq!(std::fs::read(&fx.installed).unwrap(), b"old binary");
}

#[test]
fn unsigned_attestation_is_rejected() {
    // Digest-correct, but anyone serving the release could have written it.
    assert_attestation_rejected(
        b"foreign binary",
        &attestation_signed_by(None, b"foreign binary", NEW_VERSION),
    );
}

#[test]
fn attestation_signed_by_unknown_key_is_rejected() {
    let foreign = SigningKey::from_bytes(&[1u8; 32]);
    assert_attestation_rejected(
        b"foreign binary",
        &attestation_signed_by(Some(&foreign), b"foreign binary", NEW_VERSION),
    );
}

#[test]
fn attestation_for_a_longer_version_is_rejected() {
    let mut server = mockito::Server::new();
    let info = update_info(&server, "v0.2");
    let _info = server
        .mock("GET", "/api/v1/download")
        .with_status(200)
        .with_body(info)
        .create();
    let (_bin, _att) = mock_release(
        &mut server,
        b"new binary",
        &attestation(b"new binary", "v0.20"),
        1,
    );

    let fx = Fixture::new(&server);
    let err = fx.updater().run().unwrap_err();
    assert!(matches!(err, UpdateError::VerificationFailure(_)), "{err:?}");
}

#[cfg(unix)]
#[test]
fn planted_scratch_symlink_is_never_written_through() {
    let mut server = mockito::Server::new();
    let fx = Fixture::new(&server);
    let victim = fx.dir.path().join("victim_bashrc");
    std::fs::write(&victim, "export SAFE=1\n").unwrap();
    let scratch = fx.dir.path().join("scratch");
    std::fs::create_dir_all(&scratch).unwrap();
    std::os::unix::fs::symlink(&victim, scratch.join("hishtory-client")).unwrap();

    let info = update_info(&server, NEW_VERSION);
    let _info = server
        .mock("GET", "/api/v1/download")
        .with_status(200)
        .with_body(info)
        .create();
    let (_bin, _att) = mock_release(
        &mut server,
        b"NEWBIN",
        &attestation(b"genuine binary", NEW_VERSION),
        1,
    );

    let err = fx.updater().run().unwrap_err();
    assert!(matches!(err, UpdateError::VerificationFailure(_)), "{err:?}");
    assert_eq!(std::fs::read_to_string(&victim).unwrap(), "export SAFE=1\n");
}

#[cfg(unix)]
#[test]
fn verified_binary_is_staged_as_a_fresh_file() {
    use std::os::unix::fs::PermissionsExt;

    let mut server = mockito::Server::new();
    let fx = Fixture::new(&server);
    let victim = fx.dir.path().join("victim_bashrc");
    std::fs::write(&victim, "export SAFE=1\n").unwrap();
    let staged = fx.dir.path().join("scratch/hishtory-client");
    std::fs::create_dir_all(staged.parent().unwrap()).unwrap();
    std::os::unix::fs::symlink(&victim, &staged).unwrap();

    let info = update_info(&server, NEW_VERSION);
    let _info = server
        .mock("GET", "/api/v1/download")
        .with_status(200)
        .with_body(info)
        .create();
    let (_bin, _att) = mock_release(
        &mut server,
        b"genuine binary",
        &attestation(b"genuine binary", NEW_VERSION),
        1,
    );

    let updater = fx.updater();
    let UpdateCheck::NeedsDownload(info) = updater.check().unwrap() else {
        panic!("expected an update");
    };
    let verified = updater.verify(updater.download(&info).unwrap()).unwrap();
    assert_eq!(verified.version(), NEW_VERSION);

    assert_eq!(std::fs::read_to_string(&victim).unwrap(), "export SAFE=1\n");
    let meta = std::fs::symlink_metadata(&staged).unwrap();
    assert!(meta.file_type().is_file());
    assert_eq!(meta.permissions().mode() & 0o077, 0);
    assert_eq!(std::fs::read(&staged).unwrap(), b"genuine binary");
    assert_eq!(std::fs::read(&fx.installed).unwrap(), b"old binary");
}

#[test]
fn unsupported_platform_downloads_nothing() {
    let mut server = mockito::Server::new();
    let info = update_info(&server, NEW_VERSION);
    let _info = server
        .mock("GET", "/api/v1/download")
        .with_status(200)
        .with_body(info)
        .create();
    let (bin, _att) = mock_release(&mut server, b"x", "", 0);

    let fx = Fixture::new(&server);
    let mut updater = fx.updater();
    updater.platform = Platform::new("darwin", "amd64");
    let err = updater.run().unwrap_err();

    assert!(
        matches!(err, UpdateError::UnsupportedPlatform { .. }),
        "{err:?}"
    );
    bin.assert();
}

#[test]
fn bad_update_info_is_reported() {
    let mut server = mockito::Server::new();
    let _info = server
        .mock("GET", "/api/v1/download")
        .with_status(200)
        .with_body("not json")
        .create();

    let fx = Fixture::new(&server);
    let err = fx.updater().run().unwrap_err();
    assert!(matches!(err, UpdateError::BadUpdateInfo(_)), "{err:?}");
}

#[test]
fn update_info_server_error_is_download_failure() {
    let mut server = mockito::Server::new();
    let _info = server
        .mock("GET", "/api/v1/download")
        .with_status(502)
        .create();

    let fx = Fixture::new(&server);
    let err = fx.updater().run().unwrap_err();
    assert!(matches!(err, UpdateError::DownloadFailure { .. }), "{err:?}");
}

#[cfg(unix)]
#[test]
#[serial_test::serial]
fn verified_update_replaces_binary_and_runs_install() {
    let mut server = mockito::Server::new();
    let fx = Fixture::new(&server);
    let marker = fx.dir.path().join("installed-by-new-binary");
    let script = format!(
        "#!/bin/sh\n[ \"$1\" = install ] || exit 3\ntouch {}\n",
        marker.display()
    );

    let info = update_info(&server, NEW_VERSION);
    let _info = server
        .mock("GET", "/api/v1/download")
        .with_status(200)
        .with_body(info)
        .create();
    let (bin, att) = mock_release(
        &mut server,
        script.as_bytes(),
        &attestation(script.as_bytes(), NEW_VERSION),
        1,
    );

    let outcome = fx.updater().run().unwrap();

    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            from: RUNNING_VERSION.to_owned(),
            to: NEW_VERSION.to_owned()
        }
    );
    // The old binary was unlinked and the new one ran `install`.
    assert!(!fx.installed.exists());
    assert!(marker.exists());
    let staged = fx.dir.path().join("scratch/hishtory-client");
    assert_eq!(std::fs::read(&staged).unwrap(), script.as_bytes());
    assert!(
        !fx.dir
            .path()
            .join("scratch/hishtory-client.intoto.jsonl")
            .exists()
    );
    bin.assert();
    att.assert();
}

#[cfg(unix)]
#[test]
#[serial_test::serial]
fn failing_install_step_is_reported() {
    let mut server = mockito::Server::new();
    let script = "#!/bin/sh\nexit 1\n";
    let info = update_info(&server, NEW_VERSION);
    let _info = server
        .mock("GET", "/api/v1/download")
        .with_status(200)
        .with_body(info)
        .create();
    let (_bin, _att) = mock_release(
        &mut server,
        script.as_bytes(),
        &attestation(script.as_bytes(), NEW_VERSION),
        1,
    );

    let fx = Fixture::new(&server);
    let err = fx.updater().run().unwrap_err();
    assert!(matches!(err, UpdateError::InstallFailure { .. }), "{err:?}");
}
