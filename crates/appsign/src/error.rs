//! Error types for identity assembly, bundle discovery, and signing.
//!
//! Three taxonomies cover the three phases of a signing session:
//! [`IdentityError`] for credential handling, [`DiscoveryError`] for bundle
//! traversal, and [`SigningError`] for per-unit signing. The crate-level
//! [`enum@Error`] joins them for callers that do not care which phase failed.
//!
//! Identity and discovery errors abort a session outright. Per-unit signing
//! errors are captured into the unit's result inside the
//! [`SigningReport`](crate::orchestrator::SigningReport) instead of
//! propagating out of the orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// Failure while assembling a signing identity from raw key material.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Certificate bytes parsed as neither PEM nor DER.
    #[error("certificate is not valid PEM or DER")]
    InvalidCertificate,

    /// Private key bytes parsed as neither PEM nor DER.
    #[error("private key is not valid PEM or DER")]
    InvalidPrivateKey,

    /// The PKCS#12 container could not be assembled, or the encoder
    /// produced no output.
    #[error("identity container assembly failed: {0}")]
    AssemblyFailed(String),

    /// The assembled container could not be serialized to DER.
    #[error("identity container encoding failed: {0}")]
    EncodingFailed(String),
}

/// Failure while discovering signable units inside a bundle tree.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The root bundle path does not exist.
    #[error("bundle not found: {0}")]
    NotFound(PathBuf),

    /// A symlink cycle was detected during traversal.
    #[error("cyclic symlink detected at {0}")]
    CyclicLink(PathBuf),

    /// A directory inside the bundle could not be read.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),
}

/// Failure while signing a single unit.
///
/// These are captured per unit; only configuration errors surface before
/// any signing starts.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The external signing authority returned a non-zero status code.
    ///
    /// The code is surfaced verbatim; its taxonomy belongs to the authority.
    #[error("signing authority rejected the request (status {0})")]
    AuthorityRejected(i32),

    /// The signing identity holds no container bytes.
    #[error("signing identity is missing or empty")]
    MissingIdentity,

    /// Mutually exclusive signing options were requested together.
    #[error("incompatible signing options: {0}")]
    IncompatibleFlags(String),

    /// The provisioning profile could not be written into the unit.
    #[error("failed to embed provisioning profile: {0}")]
    ProfileEmbedFailed(String),
}

/// Crate-level error covering every phase of a signing session.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    /// I/O failure outside the discovery and signing taxonomies, e.g.
    /// reading a container or profile from disk.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Property list parsing failed for Info.plist or entitlements data.
    #[error("plist error: {0}")]
    Plist(#[from] plist::Error),
}
