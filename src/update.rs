//! In-place self update.
//!
//! The flow is a chain of typed states so the destructive step cannot run
//! early:
//!
//! ```text
//! check -> UpToDate | NeedsDownload(UpdateInfo)
//!       -> download -> Downloaded
//!       -> verify   -> VerifiedUpdate   (fails closed)
//!       -> VerifiedUpdate::install      (unlink, chmod, `<new> install`)
//! ```
//!
//! Only [`Updater::verify`] can produce a [`VerifiedUpdate`], and only
//! [`VerifiedUpdate::install`] touches the installed binary. Downloads stay in
//! memory until verified; the verified bytes are then written to a freshly
//! created file in the scratch directory and that file is what runs. An
//! interrupted update is simply re-run from the start.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::UpdateError;
use crate::remote::SyncClient;

const UPDATE_INFO_PATH: &str = "/api/v1/download";
const SCRATCH_BINARY: &str = "hishtory-client";
const IN_TOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

/// Ed25519 public key that signs release attestations.
const RELEASE_KEY_HEX: &str = "80134f1ac437b0a2d97d4d49a6e2eba0c7e8b490e6c0d71a590c05a906d200b1";

/// Name of the scratch directory under the hishtory user dir.
pub const SCRATCH_DIR: &str = "update";

/// Version token of the running binary, compared verbatim with
/// [`UpdateInfo::version`].
pub const RUNNING_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// Response of `GET /api/v1/download`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpdateInfo {
    pub version: String,
    #[serde(default)]
    pub linux_amd_64_url: Option<String>,
    #[serde(default)]
    pub linux_amd_64_attestation_url: Option<String>,
    #[serde(default)]
    pub linux_arm_64_url: Option<String>,
    #[serde(default)]
    pub linux_arm_64_attestation_url: Option<String>,
    #[serde(default)]
    pub darwin_amd_64_url: Option<String>,
    #[serde(default)]
    pub darwin_amd_64_attestation_url: Option<String>,
    #[serde(default)]
    pub darwin_arm_64_url: Option<String>,
    #[serde(default)]
    pub darwin_arm_64_attestation_url: Option<String>,
}

/// OS and architecture as release artifacts name them (`linux`/`darwin`,
/// `amd64`/`arm64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    pub const fn new(os: &'static str, arch: &'static str) -> Self {
        Self { os, arch }
    }

    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        Self { os, arch }
    }

    /// Binary and attestation URLs for this platform.
    ///
    /// # Errors
    ///
    /// [`UpdateError::UnsupportedPlatform`] if the platform has no artifacts.
    pub fn urls_for<'a>(&self, info: &'a UpdateInfo) -> Result<(&'a str, &'a str), UpdateError> {
        let (bin, att) = match (self.os, self.arch) {
            ("linux", "amd64") => (&info.linux_amd_64_url, &info.linux_amd_64_attestation_url),
            ("linux", "arm64") => (&info.linux_arm_64_url, &info.linux_arm_64_attestation_url),
            ("darwin", "amd64") => (&info.darwin_amd_64_url, &info.darwin_amd_64_attestation_url),
            ("darwin", "arm64") => (&info.darwin_arm_64_url, &info.darwin_arm_64_attestation_url),
            _ => {
                return Err(UpdateError::UnsupportedPlatform {
                    os: self.os,
                    arch: self.arch,
                });
            }
        };
        match (bin.as_deref(), att.as_deref()) {
            (Some(b), Some(a)) if !b.is_empty() && !a.is_empty() => Ok((b, a)),
            _ => Err(UpdateError::UnsupportedPlatform {
                os: self.os,
                arch: self.arch,
            }),
        }
    }

    /// `<os>-<arch>`, as embedded in artifact names.
    pub fn tag(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }
}

/// What a downloaded binary must be attested as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedSubject {
    pub version: String,
    pub platform: Platform,
}

impl ExpectedSubject {
    /// Subject name the release attests the binary under:
    /// `hishtory-<version>-<os>-<arch>`.
    pub fn artifact_name(&self) -> String {
        format!("hishtory-{self}")
    }
}

impl std::fmt::Display for ExpectedSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.version, self.platform.tag())
    }
}

/// Checks that a binary was built by the expected release.
pub trait ProvenanceVerifier {
    /// # Errors
    ///
    /// [`UpdateError::VerificationFailure`] if provenance cannot be established.
    fn verify(
        &self,
        binary: &[u8],
        attestation: &[u8],
        expected: &ExpectedSubject,
    ) -> Result<(), UpdateError>;
}

#[derive(Deserialize)]
struct DsseEnvelope {
    #[serde(rename = "payloadType")]
    payload_type: String,
    payload: String,
    #[serde(default)]
    signatures: Vec<DsseSignature>,
}

#[derive(Deserialize)]
struct DsseSignature {
    sig: String,
}

#[derive(Deserialize)]
struct Statement {
    #[serde(default)]
    subject: Vec<Subject>,
}

#[derive(Deserialize)]
struct Subject {
    name: String,
    #[serde(default)]
    digest: HashMap<String, String>,
}

/// DSSE pre-authentication encoding: the exact bytes an envelope signature
/// covers (`DSSEv1 <len> <type> <len> <payload>`).
pub fn pre_auth_encoding(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "DSSEv1 {} {payload_type} {} ",
        payload_type.len(),
        payload.len()
    )
    .into_bytes();
    out.extend_from_slice(payload);
    out
}

/// Verifies a SLSA in-toto attestation (newline-delimited DSSE envelopes).
///
/// An envelope counts only if one of its Ed25519 signatures over the
/// pre-authentication encoding verifies under a trusted key. Its statement
/// must then name the binary exactly `hishtory-<version>-<os>-<arch>` with a
/// matching SHA-256 digest.
#[derive(Debug, Clone)]
pub struct SlsaVerifier {
    trusted: Vec<VerifyingKey>,
}

impl SlsaVerifier {
    pub const fn new(trusted: Vec<VerifyingKey>) -> Self {
        Self { trusted }
    }

    /// Verifier pinned to the release signing key.
    ///
    /// # Errors
    ///
    /// [`UpdateError::VerificationFailure`] if the pinned key is malformed.
    pub fn release() -> Result<Self, UpdateError> {
        let bytes: [u8; 32] = hex::decode(RELEASE_KEY_HEX)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                UpdateError::VerificationFailure("malformed release key".to_owned())
            })?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| UpdateError::VerificationFailure(format!("invalid release key: {e}")))?;
        Ok(Self::new(vec![key]))
    }

    fn is_trusted(&self, payload_type: &str, payload: &[u8], sigs: &[DsseSignature]) -> bool {
        let message = pre_auth_encoding(payload_type, payload);
        sigs.iter()
            .filter_map(|s| BASE64.decode(&s.sig).ok())
            .filter_map(|raw| Signature::from_slice(&raw).ok())
            .any(|sig| {
                self.trusted
                    .iter()
                    .any(|key| key.verify_strict(&message, &sig).is_ok())
            })
    }
}

impl ProvenanceVerifier for SlsaVerifier {
    fn verify(
        &self,
        binary: &[u8],
        attestation: &[u8],
        expected: &ExpectedSubject,
    ) -> Result<(), UpdateError> {
        let fail = UpdateError::VerificationFailure;
        let digest = hex::encode(Sha256::digest(binary));
        let doc = std::str::from_utf8(attestation)
            .map_err(|e| fail(format!("attestation is not UTF-8: {e}")))?;

        let name = expected.artifact_name();
        for line in doc.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let envelope: DsseEnvelope = serde_json::from_str(line)
                .map_err(|e| fail(format!("malformed attestation envelope: {e}")))?;
            if envelope.payload_type != IN_TOTO_PAYLOAD_TYPE {
                continue;
            }
            let payload = BASE64
                .decode(&envelope.payload)
                .map_err(|e| fail(format!("malformed attestation payload: {e}")))?;
            if !self.is_trusted(&envelope.payload_type, &payload, &envelope.signatures) {
                tracing::debug!("skipping attestation envelope without a trusted signature");
                continue;
            }
            let statement: Statement = serde_json::from_slice(&payload)
                .map_err(|e| fail(format!("malformed in-toto statement: {e}")))?;

            let matched = statement.subject.iter().any(|s| {
                s.name == name
                    && s.digest
                        .get("sha256")
                        .is_some_and(|d| d.eq_ignore_ascii_case(&digest))
            });
            if matched {
                return Ok(());
            }
        }
        Err(fail(format!(
            "no signed attestation for {name} matches sha256 {digest}"
        )))
    }
}

/// Result of [`Updater::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    UpToDate { version: String },
    NeedsDownload(UpdateInfo),
}

/// Artifacts fetched into memory, not yet trusted.
#[derive(Debug)]
pub struct Downloaded {
    version: String,
    binary: Vec<u8>,
    attestation: Vec<u8>,
}

impl Downloaded {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn binary(&self) -> &[u8] {
        &self.binary
    }

    pub fn attestation(&self) -> &[u8] {
        &self.attestation
    }
}

/// A verified binary, staged in the scratch directory.
#[derive(Debug)]
pub struct VerifiedUpdate {
    version: String,
    binary: PathBuf,
    install_path: PathBuf,
    unlink_first: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate { version: String },
    Updated { from: String, to: String },
}

pub struct Updater<'a> {
    pub client: &'a SyncClient,
    pub verifier: &'a dyn ProvenanceVerifier,
    pub running_version: String,
    /// The binary the update replaces.
    pub install_path: PathBuf,
    /// Private to the user; created with owner-only access.
    pub scratch_dir: PathBuf,
    pub platform: Platform,
}

impl Updater<'_> {
    /// Fetch [`UpdateInfo`] and compare its version with the running one.
    ///
    /// # Errors
    ///
    /// [`UpdateError::DownloadFailure`] if the info cannot be fetched,
    /// [`UpdateError::BadUpdateInfo`] if it cannot be parsed.
    pub fn check(&self) -> Result<UpdateCheck, UpdateError> {
        let body = self
            .client
            .get(UPDATE_INFO_PATH)
            .map_err(|e| UpdateError::DownloadFailure {
                url: UPDATE_INFO_PATH.to_owned(),
                source: Box::new(e),
            })?;
        let info: UpdateInfo = serde_json::from_slice(&body)
            .map_err(|e| UpdateError::BadUpdateInfo(e.to_string()))?;
        if info.version.is_empty() {
            return Err(UpdateError::BadUpdateInfo("empty version".to_owned()));
        }
        if info.version == self.running_version {
            return Ok(UpdateCheck::UpToDate {
                version: info.version,
            });
        }
        Ok(UpdateCheck::NeedsDownload(info))
    }

    /// Download this platform's binary and attestation. Nothing is written
    /// to disk.
    ///
    /// # Errors
    ///
    /// [`UpdateError::UnsupportedPlatform`] or [`UpdateError::DownloadFailure`].
    pub fn download(&self, info: &UpdateInfo) -> Result<Downloaded, UpdateError> {
        let (binary_url, attestation_url) = self.platform.urls_for(info)?;
        Ok(Downloaded {
            version: info.version.clone(),
            binary: self.fetch(binary_url)?,
            attestation: self.fetch(attestation_url)?,
        })
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        self.client
            .download(url)
            .map_err(|e| UpdateError::DownloadFailure {
                url: url.to_owned(),
                source: Box::new(e),
            })
    }

    /// Check provenance of the downloaded bytes, then stage exactly those
    /// bytes as a freshly created file in the scratch dir. Nothing is written
    /// if verification fails.
    ///
    /// # Errors
    ///
    /// [`UpdateError::VerificationFailure`] from the verifier,
    /// [`UpdateError::InstallFailure`] if staging fails.
    pub fn verify(&self, downloaded: Downloaded) -> Result<VerifiedUpdate, UpdateError> {
        let expected = ExpectedSubject {
            version: downloaded.version.clone(),
            platform: self.platform,
        };
        self.verifier
            .verify(&downloaded.binary, &downloaded.attestation, &expected)?;
        let binary = self.stage(&downloaded.binary)?;
        Ok(VerifiedUpdate {
            version: downloaded.version,
            binary,
            install_path: self.install_path.clone(),
            unlink_first: self.platform.os == "linux",
        })
    }

    fn stage(&self, bytes: &[u8]) -> Result<PathBuf, UpdateError> {
        let path = self.scratch_dir.join(SCRATCH_BINARY);
        crate::fs::create_private_dir(&self.scratch_dir)
            .and_then(|()| crate::fs::write_new_executable(&path, bytes))
            .map_err(|e| UpdateError::InstallFailure {
                step: format!("stage {}", path.display()),
                source: Some(Box::new(e)),
            })?;
        Ok(path)
    }

    /// Run the whole update.
    ///
    /// # Errors
    ///
    /// Any error of the individual steps. A verification failure leaves the
    /// installed binary untouched.
    pub fn run(&self) -> Result<UpdateOutcome, UpdateError> {
        let info = match self.check()? {
            UpdateCheck::UpToDate { version } => return Ok(UpdateOutcome::UpToDate { version }),
            UpdateCheck::NeedsDownload(info) => info,
        };
        let downloaded = self.download(&info)?;
        let verified = self.verify(downloaded)?;
        let to = verified.install()?;
        Ok(UpdateOutcome::Updated {
            from: self.running_version.clone(),
            to,
        })
    }
}

impl VerifiedUpdate {
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Swap in the new binary and let it finish its own install. Returns the
    /// installed version.
    ///
    /// On Linux the installed binary is unlinked first so the running process
    /// keeps its inode while a new file takes the path.
    ///
    /// # Errors
    ///
    /// [`UpdateError::InstallFailure`] if any step fails or `<new> install`
    /// exits non-zero.
    pub fn install(self) -> Result<String, UpdateError> {
        if self.unlink_first {
            crate::fs::remove_if_exists(&self.install_path).map_err(|e| {
                UpdateError::InstallFailure {
                    step: format!("unlink {}", self.install_path.display()),
                    source: Some(Box::new(e)),
                }
            })?;
        }
        crate::fs::make_executable(&self.binary).map_err(|e| UpdateError::InstallFailure {
            step: format!("chmod +x {}", self.binary.display()),
            source: Some(Box::new(e)),
        })?;

        let output = Command::new(&self.binary)
            .arg("install")
            .output()
            .map_err(|e| UpdateError::InstallFailure {
                step: format!("run {} install", self.binary.display()),
                source: Some(Box::new(e)),
            })?;
        if !output.status.success() {
            return Err(UpdateError::InstallFailure {
                step: format!(
                    "{} install exited with {} (stdout={:?}, stderr={:?})",
                    self.binary.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                ),
                source: None,
            });
        }
        Ok(self.version)
    }
}
