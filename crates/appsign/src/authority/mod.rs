//! Boundary to the external signing authority.
//!
//! The authority is a black box that applies the actual code signature. This
//! module owns the only place where the typed option set of a
//! [`SigningConfig`] is lowered into the authority's string-keyed
//! configuration dictionary, and defines [`SigningAuthority`], the seam the
//! orchestrator invokes per unit.
//!
//! The authority's integer status codes are surfaced verbatim through
//! [`SigningError::AuthorityRejected`]; their taxonomy is not redefined
//! here.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::Command;

use log::debug;
use secrecy::ExposeSecret;

use crate::config::{OptionKey, OptionValue, SigningConfig, SigningTarget};
use crate::error::SigningError;
use crate::identity::SigningIdentity;

/// A fully lowered signing request for one unit.
///
/// `settings` is the authority's configuration dictionary: wire keys mapped
/// to typed values, entitlements already serialized to XML plist bytes.
pub struct SignRequest<'a> {
    pub path: &'a Path,
    pub identity: &'a SigningIdentity,
    pub settings: BTreeMap<&'static str, OptionValue>,
}

/// Outcome of a successful authority invocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignatureInfo {
    /// Size of the produced signature in bytes, when the authority
    /// reports it.
    pub signature_size: u64,
}

/// The external service that applies a code signature to one unit.
///
/// Implementations may block on filesystem and network I/O; the
/// orchestrator never holds a lock across this call. Implementations must
/// treat the identity as read-only shared state.
pub trait SigningAuthority: Sync {
    fn sign(&self, request: &SignRequest<'_>) -> Result<SignatureInfo, SigningError>;
}

/// Lower a per-unit config into a [`SignRequest`] for `path`.
///
/// Entitlements are serialized to XML plist bytes under the `entitlements`
/// key; the target variant contributes either the profile blob or the
/// identifier override.
pub fn lower<'a>(
    path: &'a Path,
    config: &SigningConfig<'a>,
) -> Result<SignRequest<'a>, SigningError> {
    let mut settings: BTreeMap<&'static str, OptionValue> = BTreeMap::new();

    for (key, value) in config.options() {
        settings.insert(key.as_key(), value.clone());
    }

    let entitlements = config.target().entitlements();
    if !entitlements.is_empty() {
        let mut buf = Vec::new();
        plist::to_writer_xml(&mut buf, entitlements)
            .map_err(|e| SigningError::IncompatibleFlags(format!("bad entitlements: {e}")))?;
        settings.insert(OptionKey::Entitlements.as_key(), OptionValue::Data(buf));
    }

    match config.target() {
        SigningTarget::ProfileBased { profile, .. } => {
            settings.insert("provisioning-profile", OptionValue::Data(profile.clone()));
        }
        SigningTarget::IdentifierBased { bundle_id, .. } => {
            settings
                .entry(OptionKey::Identifier.as_key())
                .or_insert_with(|| OptionValue::Text(bundle_id.clone()));
        }
    }

    Ok(SignRequest {
        path,
        identity: config.identity(),
        settings,
    })
}

/// Authority implementation driving an external signing tool as a child
/// process.
///
/// The identity container is handed over as a temporary file; dictionary
/// entries become command-line options. The tool's exit status is the
/// authority status code.
pub struct ProcessAuthority {
    tool: std::path::PathBuf,
}

impl ProcessAuthority {
    pub fn new(tool: impl Into<std::path::PathBuf>) -> Self {
        Self { tool: tool.into() }
    }
}

impl SigningAuthority for ProcessAuthority {
    fn sign(&self, request: &SignRequest<'_>) -> Result<SignatureInfo, SigningError> {
        let mut container = tempfile::Builder::new()
            .suffix(".p12")
            .tempfile()
            .map_err(|e| SigningError::AuthorityRejected(exit_code_io(&e)))?;
        container
            .write_all(request.identity.container_bytes())
            .map_err(|e| SigningError::AuthorityRejected(exit_code_io(&e)))?;

        let mut cmd = Command::new(&self.tool);
        cmd.arg("--container").arg(container.path());
        cmd.arg("--password")
            .arg(request.identity.password().expose_secret());

        // Blob-valued options travel as files; the handles stay alive
        // until the child process has exited.
        let mut blobs = Vec::new();
        for (key, value) in &request.settings {
            match value {
                OptionValue::Bool(true) => {
                    cmd.arg(format!("--{key}"));
                }
                OptionValue::Bool(false) => {}
                OptionValue::Int(v) => {
                    cmd.arg(format!("--{key}")).arg(v.to_string());
                }
                OptionValue::Text(v) => {
                    cmd.arg(format!("--{key}")).arg(v);
                }
                OptionValue::Data(bytes) => {
                    let mut blob = tempfile::NamedTempFile::new()
                        .map_err(|e| SigningError::AuthorityRejected(exit_code_io(&e)))?;
                    blob.write_all(bytes)
                        .map_err(|e| SigningError::AuthorityRejected(exit_code_io(&e)))?;
                    cmd.arg(format!("--{key}")).arg(blob.path());
                    blobs.push(blob);
                }
            }
        }
        cmd.arg(request.path);

        debug!("invoking signing authority for {}", request.path.display());
        let status = cmd
            .status()
            .map_err(|e| SigningError::AuthorityRejected(exit_code_io(&e)))?;

        drop(blobs);
        match status.code() {
            Some(0) => Ok(SignatureInfo::default()),
            Some(code) => Err(SigningError::AuthorityRejected(code)),
            None => Err(SigningError::AuthorityRejected(-1)),
        }
    }
}

fn exit_code_io(_err: &std::io::Error) -> i32 {
    // The authority never ran; report the conventional spawn-failure code.
    127
}
