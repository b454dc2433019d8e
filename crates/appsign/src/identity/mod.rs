//! Signing-identity assembly.
//!
//! Turns raw certificate and private-key bytes (PEM or DER, auto-detected)
//! plus an optional passphrase into a password-protected PKCS#12 container,
//! the [`SigningIdentity`] consumed by every signing operation in a session.
//!
//! Encoding detection is a deterministic two-stage probe: a structured PEM
//! parse first, a binary DER parse on failure. Neither probe leaves state
//! behind, so a malformed input fails cleanly with
//! [`IdentityError::InvalidCertificate`] or
//! [`IdentityError::InvalidPrivateKey`].
//!
//! # Examples
//!
//! ```no_run
//! use appsign::identity::IdentityBuilder;
//!
//! let cert = std::fs::read("developer.pem")?;
//! let key = std::fs::read("developer.key")?;
//! let identity = IdentityBuilder::new(cert, key)
//!     .password("secret")
//!     .assemble()?;
//! assert!(!identity.container_bytes().is_empty());
//! # Ok::<(), appsign::Error>(())
//! ```

pub(crate) mod anchors;

use std::fmt;

use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::error::IdentityError;

/// The private-key layer of the container never carries its own passphrase;
/// the caller's password protects the outer container only. Consumers depend
/// on this exact layering, so it must not be strengthened independently.
const KEY_LAYER_PASSPHRASE: &[u8] = b"";

/// Friendly name stored for the key/certificate entries in the container.
const IDENTITY_FRIENDLY_NAME: &str = "";

/// Detected encoding of caller-supplied key material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyEncoding {
    /// Textual, base64-delimited PEM.
    Pem,
    /// Binary DER.
    Der,
    /// Not yet probed, or neither probe succeeded.
    Unknown,
}

/// Transient certificate or private-key bytes awaiting assembly.
///
/// The buffer is zeroized on drop; material never outlives the
/// [`IdentityBuilder`] that consumes it.
pub struct KeyMaterial {
    bytes: Zeroizing<Vec<u8>>,
    encoding: KeyEncoding,
}

impl KeyMaterial {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes.into()),
            encoding: KeyEncoding::Unknown,
        }
    }

    /// Encoding detected by the most recent probe.
    pub fn encoding(&self) -> KeyEncoding {
        self.encoding
    }

    /// Probe as an X.509 certificate: PEM first, DER on failure.
    fn parse_certificate(&mut self) -> Result<X509, IdentityError> {
        if let Ok(cert) = X509::from_pem(&self.bytes) {
            self.encoding = KeyEncoding::Pem;
            return Ok(cert);
        }
        match X509::from_der(&self.bytes) {
            Ok(cert) => {
                self.encoding = KeyEncoding::Der;
                Ok(cert)
            }
            Err(_) => {
                self.encoding = KeyEncoding::Unknown;
                Err(IdentityError::InvalidCertificate)
            }
        }
    }

    /// Probe as a private key: PEM first, DER on failure.
    ///
    /// The PEM probe supplies the constant key-layer passphrase, so an
    /// independently encrypted key input is rejected rather than silently
    /// accepted under a passphrase the container does not record.
    fn parse_private_key(&mut self) -> Result<PKey<Private>, IdentityError> {
        if let Ok(key) =
            PKey::private_key_from_pem_passphrase(&self.bytes, KEY_LAYER_PASSPHRASE)
        {
            self.encoding = KeyEncoding::Pem;
            return Ok(key);
        }
        match PKey::private_key_from_der(&self.bytes) {
            Ok(key) => {
                self.encoding = KeyEncoding::Der;
                Ok(key)
            }
            Err(_) => {
                self.encoding = KeyEncoding::Unknown;
                Err(IdentityError::InvalidPrivateKey)
            }
        }
    }
}

/// A password-protected signing-identity container.
///
/// Produced once per session by [`IdentityBuilder::assemble`] and shared
/// read-only by every signing worker. The container bytes are non-empty by
/// construction; the password is never logged or echoed.
pub struct SigningIdentity {
    container: Vec<u8>,
    password: SecretString,
}

impl SigningIdentity {
    /// Wrap an existing container produced elsewhere.
    ///
    /// The container is not decoded here; a wrong password surfaces when a
    /// consumer opens it.
    pub fn from_container(
        container: Vec<u8>,
        password: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        if container.is_empty() {
            return Err(IdentityError::AssemblyFailed(
                "container is empty".into(),
            ));
        }
        Ok(Self {
            container,
            password: SecretString::new(password.into()),
        })
    }

    /// DER-encoded PKCS#12 container.
    pub fn container_bytes(&self) -> &[u8] {
        &self.container
    }

    /// Password protecting the outer container.
    pub fn password(&self) -> &SecretString {
        &self.password
    }

    pub fn is_empty(&self) -> bool {
        self.container.is_empty()
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("container", &format_args!("{} bytes", self.container.len()))
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Assembles a [`SigningIdentity`] from raw certificate and key bytes.
///
/// # Example
///
/// ```no_run
/// # use appsign::identity::IdentityBuilder;
/// # let (cert, key) = (Vec::<u8>::new(), Vec::<u8>::new());
/// let identity = IdentityBuilder::new(cert, key)
///     .password("secret")
///     .include_platform_anchors(true)
///     .assemble()?;
/// # Ok::<(), appsign::IdentityError>(())
/// ```
pub struct IdentityBuilder {
    certificate: KeyMaterial,
    private_key: KeyMaterial,
    password: Option<SecretString>,
    ca_certificates: Vec<X509>,
    include_platform_anchors: bool,
}

impl IdentityBuilder {
    pub fn new(cert_bytes: impl Into<Vec<u8>>, key_bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            certificate: KeyMaterial::new(cert_bytes),
            private_key: KeyMaterial::new(key_bytes),
            password: None,
            ca_certificates: Vec::new(),
            include_platform_anchors: false,
        }
    }

    /// Password protecting the outer container.
    ///
    /// Absent or empty means an unencrypted container. The password is held
    /// via [`SecretString`] and zeroized when dropped.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Append an additional certificate to the container's chain.
    pub fn ca_certificate(mut self, cert: X509) -> Self {
        self.ca_certificates.push(cert);
        self
    }

    /// Include the platform root and issuing certificates in the chain.
    ///
    /// The issuing certificate is selected to match the leaf: pre-G3 leaves
    /// (recognized by issuer-name hash) get the legacy issuer.
    pub fn include_platform_anchors(mut self, include: bool) -> Self {
        self.include_platform_anchors = include;
        self
    }

    /// Assemble the container.
    ///
    /// Consumes the builder; the key material is zeroized on return, success
    /// or failure. All intermediate OpenSSL handles are scope-bound and
    /// released on every exit path.
    pub fn assemble(mut self) -> Result<SigningIdentity, IdentityError> {
        let certificate = self.certificate.parse_certificate()?;
        let private_key = self.private_key.parse_private_key()?;

        // Absent and empty passwords collapse to the same unencrypted form.
        let password = self
            .password
            .take()
            .unwrap_or_else(|| SecretString::new(String::new()));

        let mut chain = if self.include_platform_anchors {
            anchors::platform_chain(&certificate)?
        } else {
            openssl::stack::Stack::new()
                .map_err(|e| IdentityError::AssemblyFailed(e.to_string()))?
        };
        for cert in self.ca_certificates.drain(..) {
            chain
                .push(cert)
                .map_err(|e| IdentityError::AssemblyFailed(e.to_string()))?;
        }

        let mut builder = Pkcs12::builder();
        builder
            .name(IDENTITY_FRIENDLY_NAME)
            .pkey(&private_key)
            .cert(&certificate);
        if !chain.is_empty() {
            builder.ca(chain);
        }

        let pkcs12 = builder
            .build2(password.expose_secret())
            .map_err(|e| IdentityError::AssemblyFailed(e.to_string()))?;

        let container = pkcs12
            .to_der()
            .map_err(|e| IdentityError::EncodingFailed(e.to_string()))?;
        if container.is_empty() {
            return Err(IdentityError::AssemblyFailed(
                "encoder produced an empty container".into(),
            ));
        }

        Ok(SigningIdentity {
            container,
            password,
        })
    }
}

/// Assemble a signing identity in one call.
///
/// `password` of `None` or `""` produces an unencrypted container.
pub fn assemble(
    cert_bytes: &[u8],
    key_bytes: &[u8],
    password: Option<&str>,
) -> Result<SigningIdentity, IdentityError> {
    let mut builder = IdentityBuilder::new(cert_bytes, key_bytes);
    if let Some(password) = password {
        builder = builder.password(password);
    }
    builder.assemble()
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::x509::{X509Builder, X509NameBuilder};

    fn generate_test_key() -> PKey<Private> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let ec_key = EcKey::generate(&group).unwrap();
        PKey::from_ec_key(ec_key).unwrap()
    }

    fn generate_test_cert(private_key: &PKey<Private>) -> X509 {
        let mut name_builder = X509NameBuilder::new().unwrap();
        name_builder.append_entry_by_text("CN", "Test Signer").unwrap();
        name_builder.append_entry_by_text("OU", "TEAM123456").unwrap();
        let name = name_builder.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(private_key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.sign(private_key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    fn pem_pair() -> (Vec<u8>, Vec<u8>) {
        let key = generate_test_key();
        let cert = generate_test_cert(&key);
        (
            cert.to_pem().unwrap(),
            key.private_key_to_pem_pkcs8().unwrap(),
        )
    }

    #[test]
    fn assemble_from_pem_pair() {
        let (cert, key) = pem_pair();
        let identity = assemble(&cert, &key, Some("secret")).unwrap();
        assert!(!identity.container_bytes().is_empty());
    }

    #[test]
    fn assemble_from_der_pair() {
        let key = generate_test_key();
        let cert = generate_test_cert(&key);
        let identity = assemble(
            &cert.to_der().unwrap(),
            &key.private_key_to_der().unwrap(),
            Some("secret"),
        )
        .unwrap();
        assert!(!identity.container_bytes().is_empty());
    }

    #[test]
    fn encoding_probe_records_format() {
        let (cert_pem, _) = pem_pair();
        let mut material = KeyMaterial::new(cert_pem);
        assert_eq!(material.encoding(), KeyEncoding::Unknown);
        material.parse_certificate().unwrap();
        assert_eq!(material.encoding(), KeyEncoding::Pem);

        let key = generate_test_key();
        let cert = generate_test_cert(&key);
        let mut material = KeyMaterial::new(cert.to_der().unwrap());
        material.parse_certificate().unwrap();
        assert_eq!(material.encoding(), KeyEncoding::Der);
    }

    #[test]
    fn malformed_certificate_rejected() {
        let (_, key) = pem_pair();
        let result = assemble(b"not a certificate", &key, None);
        assert!(matches!(result, Err(IdentityError::InvalidCertificate)));
    }

    #[test]
    fn malformed_private_key_rejected() {
        // Valid PEM certificate, key bytes that are neither PEM nor DER:
        // no container may be produced.
        let (cert, _) = pem_pair();
        let result = assemble(&cert, b"garbage key bytes", None);
        assert!(matches!(result, Err(IdentityError::InvalidPrivateKey)));
    }

    #[test]
    fn container_reopens_with_matching_password() {
        let (cert, key) = pem_pair();
        let identity = assemble(&cert, &key, Some("secret")).unwrap();

        let parsed = Pkcs12::from_der(identity.container_bytes())
            .unwrap()
            .parse2("secret")
            .unwrap();
        assert!(parsed.cert.is_some());
        assert!(parsed.pkey.is_some());
    }

    #[test]
    fn container_rejects_wrong_password() {
        let (cert, key) = pem_pair();
        let identity = assemble(&cert, &key, Some("secret")).unwrap();

        let pkcs12 = Pkcs12::from_der(identity.container_bytes()).unwrap();
        assert!(pkcs12.parse2("wrong").is_err());
    }

    #[test]
    fn container_rejects_empty_password_when_set() {
        let (cert, key) = pem_pair();
        let identity = assemble(&cert, &key, Some("secret")).unwrap();

        let pkcs12 = Pkcs12::from_der(identity.container_bytes()).unwrap();
        assert!(pkcs12.parse2("").is_err());
    }

    #[test]
    fn empty_and_absent_password_equivalent() {
        let (cert, key) = pem_pair();
        let absent = assemble(&cert, &key, None).unwrap();
        let empty = assemble(&cert, &key, Some("")).unwrap();

        for identity in [&absent, &empty] {
            let parsed = Pkcs12::from_der(identity.container_bytes())
                .unwrap()
                .parse2("")
                .unwrap();
            assert!(parsed.pkey.is_some());
        }
    }

    #[test]
    fn platform_anchor_chain_embedded() {
        let (cert, key) = pem_pair();
        let identity = IdentityBuilder::new(cert, key)
            .password("p")
            .include_platform_anchors(true)
            .assemble()
            .unwrap();

        let parsed = Pkcs12::from_der(identity.container_bytes())
            .unwrap()
            .parse2("p")
            .unwrap();
        let chain = parsed.ca.expect("chain should be present");
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn extra_ca_certificate_carried() {
        let key = generate_test_key();
        let extra = generate_test_cert(&key);
        let (cert, key_pem) = pem_pair();

        let identity = IdentityBuilder::new(cert, key_pem)
            .ca_certificate(extra)
            .assemble()
            .unwrap();

        let parsed = Pkcs12::from_der(identity.container_bytes())
            .unwrap()
            .parse2("")
            .unwrap();
        assert_eq!(parsed.ca.map(|c| c.len()), Some(1));
    }

    #[test]
    fn debug_redacts_password() {
        let (cert, key) = pem_pair();
        let identity = assemble(&cert, &key, Some("hunter2")).unwrap();
        let rendered = format!("{identity:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[redacted]"));
    }
}
