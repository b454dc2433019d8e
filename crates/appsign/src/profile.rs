//! Provisioning profile parsing and selection.
//!
//! A provisioning profile is a CMS-signed XML plist. The payload is located
//! by marker scan rather than CMS decoding, which stays out of scope here;
//! the profile bytes themselves are carried opaquely for embedding.

use std::fs;
use std::path::Path;

use plist::{Dictionary, Value};

use crate::{Error, Result};

/// A platform-issued authorization blob binding a signing identity, an
/// application identifier, and a distribution scope.
///
/// The raw bytes are kept verbatim for embedding into a bundle; the parsed
/// payload backs entitlement and identifier lookups.
#[derive(Clone)]
pub struct ProvisioningProfile {
    data: Vec<u8>,
    payload: Dictionary,
}

impl ProvisioningProfile {
    /// Parse a profile from its raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let payload = extract_payload(&data)?;
        Ok(Self { data, payload })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(fs::read(path)?)
    }

    /// Raw profile bytes, exactly as supplied.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn name(&self) -> Option<&str> {
        self.payload.get("Name").and_then(Value::as_string)
    }

    pub fn uuid(&self) -> Option<&str> {
        self.payload.get("UUID").and_then(Value::as_string)
    }

    /// Entitlements granted by this profile.
    pub fn entitlements(&self) -> Option<&Dictionary> {
        self.payload
            .get("Entitlements")
            .and_then(Value::as_dictionary)
    }

    /// Full application identifier from the entitlements, including the
    /// team prefix, e.g. `TEAM123456.com.example.app`.
    pub fn application_identifier(&self) -> Option<&str> {
        self.entitlements()?
            .get("application-identifier")
            .and_then(Value::as_string)
    }

    /// Bundle identifier with the team prefix stripped.
    pub fn bundle_identifier(&self) -> Option<&str> {
        let app_id = self.application_identifier()?;
        app_id.split_once('.').map(|(_, rest)| rest)
    }

    /// Whether this profile covers the given bundle identifier.
    ///
    /// Matching compares identifier prefixes (all segments but the last),
    /// so `com.example.app` is covered by a profile for `com.example.*`.
    pub fn matches(&self, bundle_id: &str) -> bool {
        match self.bundle_identifier() {
            Some(profile_id) => identifier_prefix(profile_id) == identifier_prefix(bundle_id),
            None => false,
        }
    }
}

impl std::fmt::Debug for ProvisioningProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningProfile")
            .field("name", &self.name())
            .field("uuid", &self.uuid())
            .field("bundle_identifier", &self.bundle_identifier())
            .finish()
    }
}

/// First profile covering the given bundle identifier.
pub fn select_profile<'a>(
    profiles: &'a [ProvisioningProfile],
    bundle_id: &str,
) -> Option<&'a ProvisioningProfile> {
    profiles.iter().find(|p| p.matches(bundle_id))
}

fn identifier_prefix(bundle_id: &str) -> &str {
    match bundle_id.rsplit_once('.') {
        Some((prefix, _)) => prefix,
        None => bundle_id,
    }
}

/// Locate and parse the XML plist payload inside the CMS wrapper.
fn extract_payload(data: &[u8]) -> Result<Dictionary> {
    let start = data
        .windows(5)
        .position(|w| w == b"<?xml")
        .ok_or_else(|| plist_not_found())?;
    let end = data
        .windows(8)
        .rposition(|w| w == b"</plist>")
        .map(|p| p + 8)
        .ok_or_else(|| plist_not_found())?;
    if start >= end {
        return Err(plist_not_found());
    }

    let value: Value = plist::from_bytes(&data[start..end])?;
    value.into_dictionary().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "profile payload is not a dictionary",
        ))
    })
}

fn plist_not_found() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "no plist payload found in provisioning profile",
    ))
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::profile_bytes;
    use super::*;

    #[test]
    fn parses_wrapped_payload() {
        let profile =
            ProvisioningProfile::from_bytes(profile_bytes("TEAM1.com.example.app", "Dev")).unwrap();
        assert_eq!(profile.name(), Some("Dev"));
        assert_eq!(profile.uuid(), Some("aaaa-bbbb"));
        assert_eq!(
            profile.application_identifier(),
            Some("TEAM1.com.example.app")
        );
        assert_eq!(profile.bundle_identifier(), Some("com.example.app"));
    }

    #[test]
    fn entitlements_exposed() {
        let profile =
            ProvisioningProfile::from_bytes(profile_bytes("TEAM1.com.example.app", "Dev")).unwrap();
        let entitlements = profile.entitlements().unwrap();
        assert_eq!(
            entitlements.get("get-task-allow").and_then(Value::as_boolean),
            Some(true)
        );
    }

    #[test]
    fn rejects_data_without_payload() {
        assert!(ProvisioningProfile::from_bytes(b"no plist here".to_vec()).is_err());
    }

    #[test]
    fn prefix_matching() {
        let profile =
            ProvisioningProfile::from_bytes(profile_bytes("TEAM1.com.example.app", "Dev")).unwrap();
        assert!(profile.matches("com.example.app"));
        assert!(profile.matches("com.example.widget"));
        assert!(!profile.matches("org.other.app"));
    }

    #[test]
    fn selects_covering_profile() {
        let profiles = vec![
            ProvisioningProfile::from_bytes(profile_bytes("TEAM1.com.alpha.app", "Alpha")).unwrap(),
            ProvisioningProfile::from_bytes(profile_bytes("TEAM1.com.beta.app", "Beta")).unwrap(),
        ];
        let selected = select_profile(&profiles, "com.beta.extension").unwrap();
        assert_eq!(selected.name(), Some("Beta"));
    }
}
