//! Per-unit signing configuration.
//!
//! [`SigningConfig`] is an immutable, validated description of how one
//! signable unit gets signed: the identity, the target variant (profile- or
//! identifier-based), and a typed option set. The option keys form a closed
//! enumeration ([`OptionKey`]); they resolve to their string wire names only
//! inside the authority boundary adapter, never in orchestration logic.

use std::collections::BTreeMap;

use plist::Dictionary;

use crate::error::SigningError;
use crate::identity::SigningIdentity;

/// Capability grant for one signable unit: string keys mapped to
/// structured plist values.
pub type Entitlements = Dictionary;

/// The two invocation contracts of the signing authority.
///
/// Profile-based signing embeds a provisioning profile; identifier-based
/// signing supplies a bundle identifier instead (ad-hoc or enterprise
/// distribution without a profile).
#[derive(Clone, Debug)]
pub enum SigningTarget {
    ProfileBased {
        profile: Vec<u8>,
        entitlements: Entitlements,
    },
    IdentifierBased {
        bundle_id: String,
        entitlements: Entitlements,
    },
}

impl SigningTarget {
    pub fn entitlements(&self) -> &Entitlements {
        match self {
            SigningTarget::ProfileBased { entitlements, .. } => entitlements,
            SigningTarget::IdentifierBased { entitlements, .. } => entitlements,
        }
    }

    pub fn profile(&self) -> Option<&[u8]> {
        match self {
            SigningTarget::ProfileBased { profile, .. } => Some(profile),
            SigningTarget::IdentifierBased { .. } => None,
        }
    }

    pub fn bundle_id(&self) -> Option<&str> {
        match self {
            SigningTarget::ProfileBased { .. } => None,
            SigningTarget::IdentifierBased { bundle_id, .. } => Some(bundle_id),
        }
    }
}

/// Named configuration options recognized by the signing authority.
///
/// Closed enumeration of the authority's configuration dictionary keys.
/// [`OptionKey::as_key`] yields the wire name; only the boundary adapter
/// performs that resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptionKey {
    ApplicationData,
    Detached,
    DigestAlgorithm,
    DryRun,
    Entitlements,
    Flags,
    ForceLibraryEntitlements,
    Identifier,
    IdentifierPrefix,
    Identity,
    PageSize,
    Requirements,
    ResourceRules,
    SdkRoot,
    SigningTime,
    RequireTimestamp,
    TimestampServer,
    TimestampAuthentication,
    TimestampOmitCertificates,
    PreserveMetadata,
    TeamIdentifier,
    PlatformIdentifier,
    RuntimeVersion,
    PreserveAfsc,
    OmitAdhocFlag,
    LaunchConstraintSelf,
    LaunchConstraintParent,
    LaunchConstraintResponsible,
    LibraryConstraint,
    EditCpuType,
    EditCpuSubtype,
    EditCms,
}

impl OptionKey {
    /// Wire name of this option in the authority's configuration dictionary.
    pub fn as_key(self) -> &'static str {
        match self {
            OptionKey::ApplicationData => "application-data",
            OptionKey::Detached => "detached",
            OptionKey::DigestAlgorithm => "digest-algorithm",
            OptionKey::DryRun => "dryrun",
            OptionKey::Entitlements => "entitlements",
            OptionKey::Flags => "flags",
            OptionKey::ForceLibraryEntitlements => "force-library-entitlements",
            OptionKey::Identifier => "identifier",
            OptionKey::IdentifierPrefix => "identifier-prefix",
            OptionKey::Identity => "signer",
            OptionKey::PageSize => "pagesize",
            OptionKey::Requirements => "requirements",
            OptionKey::ResourceRules => "resource-rules",
            OptionKey::SdkRoot => "sdkroot",
            OptionKey::SigningTime => "signing-time",
            OptionKey::RequireTimestamp => "timestamp-required",
            OptionKey::TimestampServer => "timestamp-url",
            OptionKey::TimestampAuthentication => "timestamp-authentication",
            OptionKey::TimestampOmitCertificates => "timestamp-omit-certificates",
            OptionKey::PreserveMetadata => "preserve-metadata",
            OptionKey::TeamIdentifier => "teamidentifier",
            OptionKey::PlatformIdentifier => "platform-identifier",
            OptionKey::RuntimeVersion => "runtime-version",
            OptionKey::PreserveAfsc => "preserve-afsc",
            OptionKey::OmitAdhocFlag => "omit-adhoc-flag",
            OptionKey::LaunchConstraintSelf => "launch-constraint-self",
            OptionKey::LaunchConstraintParent => "launch-constraint-parent",
            OptionKey::LaunchConstraintResponsible => "launch-constraint-responsible",
            OptionKey::LibraryConstraint => "library-constraint",
            OptionKey::EditCpuType => "edit-cpu-type",
            OptionKey::EditCpuSubtype => "edit-cpu-subtype",
            OptionKey::EditCms => "edit-cms",
        }
    }
}

/// Typed value carried by an [`OptionKey`].
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Data(Vec<u8>),
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Text(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::Text(v)
    }
}

impl From<Vec<u8>> for OptionValue {
    fn from(v: Vec<u8>) -> Self {
        OptionValue::Data(v)
    }
}

/// Digest algorithm requested from the authority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    #[default]
    Sha256,
}

impl DigestAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }
}

/// Immutable, validated signing configuration for a single unit.
///
/// Holds a reference to the session's [`SigningIdentity`]; the identity
/// outlives every config derived from it.
#[derive(Debug)]
pub struct SigningConfig<'a> {
    identity: &'a SigningIdentity,
    target: SigningTarget,
    options: BTreeMap<OptionKey, OptionValue>,
}

impl<'a> SigningConfig<'a> {
    pub fn builder(identity: &'a SigningIdentity, target: SigningTarget) -> SigningConfigBuilder<'a> {
        SigningConfigBuilder {
            identity,
            target,
            options: BTreeMap::new(),
        }
    }

    pub fn identity(&self) -> &'a SigningIdentity {
        self.identity
    }

    pub fn target(&self) -> &SigningTarget {
        &self.target
    }

    pub fn options(&self) -> impl Iterator<Item = (OptionKey, &OptionValue)> {
        self.options.iter().map(|(k, v)| (*k, v))
    }

    pub fn get(&self, key: OptionKey) -> Option<&OptionValue> {
        self.options.get(&key)
    }
}

/// Builder for [`SigningConfig`]. Validation happens in [`build`].
///
/// [`build`]: SigningConfigBuilder::build
pub struct SigningConfigBuilder<'a> {
    identity: &'a SigningIdentity,
    target: SigningTarget,
    options: BTreeMap<OptionKey, OptionValue>,
}

impl<'a> SigningConfigBuilder<'a> {
    /// Set an arbitrary option.
    pub fn option(mut self, key: OptionKey, value: impl Into<OptionValue>) -> Self {
        self.options.insert(key, value.into());
        self
    }

    /// Produce a detached signature instead of rewriting the unit in place.
    pub fn detached(self, detached: bool) -> Self {
        self.option(OptionKey::Detached, detached)
    }

    pub fn dry_run(self, dry_run: bool) -> Self {
        self.option(OptionKey::DryRun, dry_run)
    }

    pub fn digest_algorithm(self, algorithm: DigestAlgorithm) -> Self {
        self.option(OptionKey::DigestAlgorithm, algorithm.as_str())
    }

    /// Code identifier override for this unit.
    pub fn identifier(self, identifier: impl Into<String>) -> Self {
        self.option(OptionKey::Identifier, identifier.into())
    }

    pub fn identifier_prefix(self, prefix: impl Into<String>) -> Self {
        self.option(OptionKey::IdentifierPrefix, prefix.into())
    }

    pub fn team_identifier(self, team: impl Into<String>) -> Self {
        self.option(OptionKey::TeamIdentifier, team.into())
    }

    pub fn require_timestamp(self, require: bool) -> Self {
        self.option(OptionKey::RequireTimestamp, require)
    }

    pub fn timestamp_server(self, url: impl Into<String>) -> Self {
        self.option(OptionKey::TimestampServer, url.into())
    }

    pub fn resource_rules(self, rules: Vec<u8>) -> Self {
        self.option(OptionKey::ResourceRules, rules)
    }

    pub fn preserve_metadata(self, preserve: bool) -> Self {
        self.option(OptionKey::PreserveMetadata, preserve)
    }

    pub fn flags(self, flags: i64) -> Self {
        self.option(OptionKey::Flags, flags)
    }

    /// Validate and freeze the configuration.
    ///
    /// Fails with [`SigningError::MissingIdentity`] when the identity holds
    /// no container, and with [`SigningError::IncompatibleFlags`] when
    /// detached-signature mode is combined with resource-rules options,
    /// which require in-place rewriting.
    pub fn build(self) -> Result<SigningConfig<'a>, SigningError> {
        if self.identity.is_empty() {
            return Err(SigningError::MissingIdentity);
        }

        let detached = matches!(
            self.options.get(&OptionKey::Detached),
            Some(OptionValue::Bool(true))
        );
        if detached && self.options.contains_key(&OptionKey::ResourceRules) {
            return Err(SigningError::IncompatibleFlags(
                "detached signature cannot be combined with resource rules".into(),
            ));
        }

        Ok(SigningConfig {
            identity: self.identity,
            target: self.target,
            options: self.options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityBuilder;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;
    use openssl::pkey::PKey;

    fn test_identity() -> SigningIdentity {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

        let mut name = openssl::x509::X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "Config Test").unwrap();
        let name = name.build();

        let mut cert = openssl::x509::X509Builder::new().unwrap();
        cert.set_version(2).unwrap();
        let serial = openssl::bn::BigNum::from_u32(1).unwrap();
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

        IdentityBuilder::new(
            cert.to_pem().unwrap(),
            key.private_key_to_pem_pkcs8().unwrap(),
        )
        .assemble()
        .unwrap()
    }

    fn identifier_target() -> SigningTarget {
        SigningTarget::IdentifierBased {
            bundle_id: "com.example.app".into(),
            entitlements: Entitlements::new(),
        }
    }

    #[test]
    fn builds_with_typed_options() {
        let identity = test_identity();
        let config = SigningConfig::builder(&identity, identifier_target())
            .digest_algorithm(DigestAlgorithm::Sha256)
            .team_identifier("TEAM123456")
            .require_timestamp(true)
            .build()
            .unwrap();

        assert_eq!(
            config.get(OptionKey::DigestAlgorithm),
            Some(&OptionValue::Text("sha256".into()))
        );
        assert_eq!(
            config.get(OptionKey::RequireTimestamp),
            Some(&OptionValue::Bool(true))
        );
        assert_eq!(config.target().bundle_id(), Some("com.example.app"));
    }

    #[test]
    fn detached_with_resource_rules_rejected() {
        let identity = test_identity();
        let result = SigningConfig::builder(&identity, identifier_target())
            .detached(true)
            .resource_rules(b"<plist/>".to_vec())
            .build();

        assert!(matches!(result, Err(SigningError::IncompatibleFlags(_))));
    }

    #[test]
    fn detached_alone_accepted() {
        let identity = test_identity();
        let config = SigningConfig::builder(&identity, identifier_target())
            .detached(true)
            .build()
            .unwrap();
        assert_eq!(config.get(OptionKey::Detached), Some(&OptionValue::Bool(true)));
    }

    #[test]
    fn every_option_key_has_a_distinct_wire_name() {
        use std::collections::BTreeSet;
        let keys = [
            OptionKey::ApplicationData,
            OptionKey::Detached,
            OptionKey::DigestAlgorithm,
            OptionKey::DryRun,
            OptionKey::Entitlements,
            OptionKey::Flags,
            OptionKey::ForceLibraryEntitlements,
            OptionKey::Identifier,
            OptionKey::IdentifierPrefix,
            OptionKey::Identity,
            OptionKey::PageSize,
            OptionKey::Requirements,
            OptionKey::ResourceRules,
            OptionKey::SdkRoot,
            OptionKey::SigningTime,
            OptionKey::RequireTimestamp,
            OptionKey::TimestampServer,
            OptionKey::TimestampAuthentication,
            OptionKey::TimestampOmitCertificates,
            OptionKey::PreserveMetadata,
            OptionKey::TeamIdentifier,
            OptionKey::PlatformIdentifier,
            OptionKey::RuntimeVersion,
            OptionKey::PreserveAfsc,
            OptionKey::OmitAdhocFlag,
            OptionKey::LaunchConstraintSelf,
            OptionKey::LaunchConstraintParent,
            OptionKey::LaunchConstraintResponsible,
            OptionKey::LibraryConstraint,
            OptionKey::EditCpuType,
            OptionKey::EditCpuSubtype,
            OptionKey::EditCms,
        ];
        let names: BTreeSet<_> = keys.iter().map(|k| k.as_key()).collect();
        assert_eq!(names.len(), keys.len());
    }

    #[test]
    fn target_accessors() {
        let profile = SigningTarget::ProfileBased {
            profile: vec![1, 2, 3],
            entitlements: Entitlements::new(),
        };
        assert_eq!(profile.profile(), Some(&[1u8, 2, 3][..]));
        assert_eq!(profile.bundle_id(), None);

        let ident = identifier_target();
        assert_eq!(ident.profile(), None);
        assert_eq!(ident.bundle_id(), Some("com.example.app"));
    }
}
