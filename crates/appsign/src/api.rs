//! Integer-status entry points.
//!
//! These mirror the external invocation contract: each call takes a target
//! path, a container path and password, and either a provisioning-profile
//! path or a bundle-identifier override, and collapses the outcome to an
//! integer status — `0` on success, the authority's own code when it
//! rejected the unit, `1` for everything else. Callers wanting the detailed
//! per-unit report use [`SigningOrchestrator`] directly.

use std::fs;
use std::path::Path;

use log::error;

use crate::authority::{lower, SigningAuthority};
use crate::config::{Entitlements, SigningConfig, SigningTarget};
use crate::error::{Error, SigningError};
use crate::identity::SigningIdentity;
use crate::orchestrator::SigningOrchestrator;
use crate::profile::ProvisioningProfile;
use crate::Result;

/// Sign one unit using a provisioning profile.
pub fn sign_with_profile<A: SigningAuthority>(
    authority: &A,
    target: &Path,
    container: &Path,
    password: &str,
    profile_path: &Path,
    entitlements: Entitlements,
) -> i32 {
    let outcome = (|| -> Result<()> {
        let identity = load_identity(container, password)?;
        let profile = fs::read(profile_path)?;
        let config = SigningConfig::builder(
            &identity,
            SigningTarget::ProfileBased {
                profile,
                entitlements,
            },
        )
        .build()?;
        let request = lower(target, &config)?;
        authority.sign(&request)?;
        Ok(())
    })();
    collapse(target, outcome)
}

/// Sign one unit using a bundle-identifier override, without a profile.
pub fn sign_with_identifier<A: SigningAuthority>(
    authority: &A,
    target: &Path,
    container: &Path,
    password: &str,
    bundle_id: &str,
    entitlements: Entitlements,
) -> i32 {
    let outcome = (|| -> Result<()> {
        let identity = load_identity(container, password)?;
        let config = SigningConfig::builder(
            &identity,
            SigningTarget::IdentifierBased {
                bundle_id: bundle_id.to_string(),
                entitlements,
            },
        )
        .build()?;
        let request = lower(target, &config)?;
        authority.sign(&request)?;
        Ok(())
    })();
    collapse(target, outcome)
}

/// Sign a bundle and every nested signable unit inside it.
///
/// `profile_path` and `bundle_id` select the call shape per unit: when a
/// profile is supplied it is embedded into units that carry one, everything
/// else signs identifier-based.
pub fn sign_all_nested<A: SigningAuthority>(
    authority: &A,
    bundle: &Path,
    container: &Path,
    password: &str,
    profile_path: Option<&Path>,
    bundle_id: Option<&str>,
    entitlements: Entitlements,
) -> i32 {
    let outcome = (|| -> Result<i32> {
        let identity = load_identity(container, password)?;
        let mut orchestrator = SigningOrchestrator::new(authority, &identity)
            .default_entitlements(entitlements);
        if let Some(path) = profile_path {
            orchestrator = orchestrator.provisioning_profile(ProvisioningProfile::from_path(path)?);
        }
        if let Some(bundle_id) = bundle_id {
            orchestrator = orchestrator.bundle_identifier(bundle_id);
        }
        Ok(orchestrator.sign_all(bundle)?.status_code())
    })();
    match outcome {
        Ok(code) => code,
        Err(e) => {
            error!("signing {} failed: {e}", bundle.display());
            1
        }
    }
}

fn load_identity(container: &Path, password: &str) -> Result<SigningIdentity> {
    let bytes = fs::read(container)?;
    Ok(SigningIdentity::from_container(bytes, password)?)
}

fn collapse(target: &Path, outcome: Result<()>) -> i32 {
    match outcome {
        Ok(()) => 0,
        Err(Error::Signing(SigningError::AuthorityRejected(code))) => code,
        Err(e) => {
            error!("signing {} failed: {e}", target.display());
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{SignRequest, SignatureInfo};
    use crate::identity::IdentityBuilder;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::{NamedTempFile, TempDir};

    struct StubAuthority {
        status: i32,
        requests: Mutex<Vec<std::path::PathBuf>>,
    }

    impl StubAuthority {
        fn ok() -> Self {
            Self {
                status: 0,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn rejecting(status: i32) -> Self {
            Self {
                status,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl SigningAuthority for StubAuthority {
        fn sign(&self, request: &SignRequest<'_>) -> std::result::Result<SignatureInfo, SigningError> {
            self.requests
                .lock()
                .unwrap()
                .push(request.path.to_path_buf());
            if self.status == 0 {
                Ok(SignatureInfo::default())
            } else {
                Err(SigningError::AuthorityRejected(self.status))
            }
        }
    }

    fn container_file() -> NamedTempFile {
        use openssl::ec::{EcGroup, EcKey};
        use openssl::nid::Nid;
        use openssl::pkey::PKey;

        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

        let mut name = openssl::x509::X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "Api Test").unwrap();
        let name = name.build();

        let mut cert = openssl::x509::X509Builder::new().unwrap();
        cert.set_version(2).unwrap();
        let serial = openssl::bn::BigNum::from_u32(5).unwrap();
        cert.set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();
        cert.set_subject_name(&name).unwrap();
        cert.set_issuer_name(&name).unwrap();
        cert.set_pubkey(&key).unwrap();
        cert.set_not_before(&openssl::asn1::Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        cert.set_not_after(&openssl::asn1::Asn1Time::days_from_now(1).unwrap())
            .unwrap();
        cert.sign(&key, openssl::hash::MessageDigest::sha256())
            .unwrap();
        let cert = cert.build();

        let identity = IdentityBuilder::new(
            cert.to_pem().unwrap(),
            key.private_key_to_pem_pkcs8().unwrap(),
        )
        .password("p")
        .assemble()
        .unwrap();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(identity.container_bytes()).unwrap();
        file
    }

    #[test]
    fn identifier_shape_returns_zero_on_success() {
        let container = container_file();
        let authority = StubAuthority::ok();

        let status = sign_with_identifier(
            &authority,
            Path::new("Demo.app"),
            container.path(),
            "p",
            "com.example.app",
            Entitlements::new(),
        );
        assert_eq!(status, 0);
        assert_eq!(authority.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn authority_code_surfaces_verbatim() {
        let container = container_file();
        let authority = StubAuthority::rejecting(66);

        let status = sign_with_identifier(
            &authority,
            Path::new("Demo.app"),
            container.path(),
            "p",
            "com.example.app",
            Entitlements::new(),
        );
        assert_eq!(status, 66);
    }

    #[test]
    fn missing_container_is_nonzero_without_invocation() {
        let authority = StubAuthority::ok();
        let status = sign_with_identifier(
            &authority,
            Path::new("Demo.app"),
            Path::new("/nonexistent/identity.p12"),
            "p",
            "com.example.app",
            Entitlements::new(),
        );
        assert_eq!(status, 1);
        assert!(authority.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn profile_shape_reads_profile_from_disk() {
        let container = container_file();
        let mut profile = NamedTempFile::new().unwrap();
        profile
            .write_all(&crate::profile::test_fixtures::profile_bytes(
                "TEAM1.com.example.app",
                "Api",
            ))
            .unwrap();

        let authority = StubAuthority::ok();
        let status = sign_with_profile(
            &authority,
            Path::new("Demo.app"),
            container.path(),
            "p",
            profile.path(),
            Entitlements::new(),
        );
        assert_eq!(status, 0);
    }

    #[test]
    fn nested_entry_signs_whole_tree() {
        let tmp = TempDir::new().unwrap();
        let app = tmp.path().join("Demo.app");
        let framework = app.join("Frameworks/A.framework");
        std::fs::create_dir_all(&framework).unwrap();

        let container = container_file();
        let authority = StubAuthority::ok();

        let status = sign_all_nested(
            &authority,
            &app,
            container.path(),
            "p",
            None,
            Some("com.example.app"),
            Entitlements::new(),
        );
        assert_eq!(status, 0);
        assert_eq!(authority.requests.lock().unwrap().len(), 2);
    }

    #[test]
    fn nested_entry_missing_bundle_is_nonzero() {
        let container = container_file();
        let authority = StubAuthority::ok();

        let status = sign_all_nested(
            &authority,
            Path::new("/nonexistent/Demo.app"),
            container.path(),
            "p",
            None,
            None,
            Entitlements::new(),
        );
        assert_eq!(status, 1);
        assert!(authority.requests.lock().unwrap().is_empty());
    }
}
