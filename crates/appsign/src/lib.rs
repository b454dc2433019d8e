//! Signing-identity assembly and recursive app bundle code signing.
//!
//! The crate packages a certificate and private key into a
//! password-protected PKCS#12 container ([`identity`]), discovers every
//! signable unit inside an application bundle ([`bundle`]), and drives an
//! external signing authority over the tree bottom-up ([`orchestrator`]).
//!
//! ```no_run
//! use appsign::authority::ProcessAuthority;
//! use appsign::identity::IdentityBuilder;
//! use appsign::orchestrator::SigningOrchestrator;
//!
//! let identity = IdentityBuilder::new(
//!     std::fs::read("developer.pem")?,
//!     std::fs::read("developer.key")?,
//! )
//! .password("secret")
//! .assemble()?;
//!
//! let authority = ProcessAuthority::new("codesign");
//! let report = SigningOrchestrator::new(&authority, &identity)
//!     .bundle_identifier("com.example.app")
//!     .sign_all("Demo.app")?;
//! assert!(report.is_success());
//! # Ok::<(), appsign::Error>(())
//! ```

pub mod api;
pub mod authority;
pub mod bundle;
pub mod config;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod profile;

pub use api::{sign_all_nested, sign_with_identifier, sign_with_profile};
pub use authority::{ProcessAuthority, SignRequest, SignatureInfo, SigningAuthority};
pub use bundle::{discover, BundleKind, BundleNode};
pub use config::{DigestAlgorithm, Entitlements, OptionKey, OptionValue, SigningConfig, SigningTarget};
pub use error::{DiscoveryError, Error, IdentityError, SigningError};
pub use identity::{IdentityBuilder, KeyEncoding, KeyMaterial, SigningIdentity};
pub use orchestrator::{SignStatus, SigningOrchestrator, SigningReport, SigningResult};
pub use profile::ProvisioningProfile;

pub type Result<T> = std::result::Result<T, Error>;
