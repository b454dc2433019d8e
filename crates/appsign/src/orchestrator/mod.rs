//! Recursive signing orchestration.
//!
//! [`SigningOrchestrator`] drives the bundle walker bottom-up: every unit's
//! children are signed before the unit itself, independent sibling subtrees
//! run concurrently on the rayon pool, and each unit's outcome lands in the
//! session's [`SigningReport`].
//!
//! A unit progresses `Pending -> Signing -> {Signed | Failed}`; there is no
//! retry state. Retrying is caller policy, applied by re-invoking
//! [`sign_all`](SigningOrchestrator::sign_all) — which never skips nodes, so
//! a re-run re-signs the whole tree deterministically.
//!
//! A failed child invalidates every ancestor on its path (the authority is
//! not invoked for them), while unrelated sibling subtrees continue. Results
//! flow through a single channel drained only by the orchestrator, so the
//! report is assembled under a single-writer discipline; no lock is held
//! across an authority invocation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::authority::{lower, SigningAuthority};
use crate::bundle::{discover, BundleNode};
use crate::config::{Entitlements, OptionKey, OptionValue, SigningConfig, SigningTarget};
use crate::error::SigningError;
use crate::identity::SigningIdentity;
use crate::profile::{select_profile, ProvisioningProfile};
use crate::Result;

/// Terminal status of one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignStatus {
    Signed,
    Failed(String),
}

impl SignStatus {
    pub fn is_signed(&self) -> bool {
        matches!(self, SignStatus::Signed)
    }
}

/// Outcome recorded for one unit.
#[derive(Clone, Debug)]
pub struct SigningResult {
    pub path: PathBuf,
    pub status: SignStatus,
    pub signature_size: Option<u64>,
    pub timestamp: SystemTime,
}

/// Aggregated outcome of one signing session.
///
/// `Success` only when every unit signed; the integer collapse of that
/// verdict is [`status_code`](SigningReport::status_code).
#[derive(Debug, Default)]
pub struct SigningReport {
    results: Vec<SigningResult>,
}

impl SigningReport {
    pub fn results(&self) -> &[SigningResult] {
        &self.results
    }

    pub fn result_for(&self, path: impl AsRef<Path>) -> Option<&SigningResult> {
        let path = path.as_ref();
        self.results.iter().find(|r| r.path == path)
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.status.is_signed())
    }

    /// `0` when the entire tree signed, `1` otherwise.
    pub fn status_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &SigningResult> {
        self.results.iter().filter(|r| !r.status.is_signed())
    }
}

/// Drives discovery and per-unit signing for one bundle tree.
pub struct SigningOrchestrator<'a, A: SigningAuthority> {
    authority: &'a A,
    identity: &'a SigningIdentity,
    default_entitlements: Entitlements,
    profiles: Vec<ProvisioningProfile>,
    bundle_id_override: Option<String>,
    base_options: Vec<(OptionKey, OptionValue)>,
    cancel: Arc<AtomicBool>,
}

impl<'a, A: SigningAuthority> SigningOrchestrator<'a, A> {
    pub fn new(authority: &'a A, identity: &'a SigningIdentity) -> Self {
        Self {
            authority,
            identity,
            default_entitlements: Entitlements::new(),
            profiles: Vec::new(),
            bundle_id_override: None,
            base_options: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Entitlements applied to units without their own embedded descriptor.
    pub fn default_entitlements(mut self, entitlements: Entitlements) -> Self {
        self.default_entitlements = entitlements;
        self
    }

    /// Add a provisioning profile candidate for units that carry one.
    pub fn provisioning_profile(mut self, profile: ProvisioningProfile) -> Self {
        self.profiles.push(profile);
        self
    }

    /// Bundle identifier override for the root unit.
    pub fn bundle_identifier(mut self, bundle_id: impl Into<String>) -> Self {
        self.bundle_id_override = Some(bundle_id.into());
        self
    }

    /// Option applied to every unit's configuration.
    pub fn option(mut self, key: OptionKey, value: impl Into<OptionValue>) -> Self {
        self.base_options.push((key, value.into()));
        self
    }

    /// Cooperative cancellation flag, observed between unit invocations.
    ///
    /// An in-flight signature is never interrupted; units not yet started
    /// are recorded as failed instead of being silently dropped.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Sign every unit under `root`, children before parents.
    ///
    /// Discovery errors abort the session; per-unit signing failures are
    /// captured in the report.
    pub fn sign_all(&self, root: impl AsRef<Path>) -> Result<SigningReport> {
        let tree = discover(root.as_ref())?;

        let (tx, rx) = mpsc::channel();
        self.sign_subtree(&tree, true, &tx);
        drop(tx);

        let mut results: Vec<SigningResult> = rx.into_iter().collect();
        results.sort_by(|a, b| a.path.cmp(&b.path));

        let report = SigningReport { results };
        info!(
            "signing session finished: {} unit(s), {} failed",
            report.results.len(),
            report.failed().count()
        );
        Ok(report)
    }

    /// Sign `node` after all of its children. Returns whether the whole
    /// subtree signed.
    fn sign_subtree(&self, node: &BundleNode, is_root: bool, tx: &Sender<SigningResult>) -> bool {
        let children = node.children();
        let children_ok = if children.len() > 1 {
            // Independent sibling subtrees have no ordering dependency.
            children
                .par_iter()
                .map_with(tx.clone(), |tx, child| self.sign_subtree(child, false, tx))
                .collect::<Vec<bool>>()
        } else {
            children
                .iter()
                .map(|child| self.sign_subtree(child, false, tx))
                .collect()
        };

        if !children_ok.iter().all(|&ok| ok) {
            // Embedding an unsigned child in a signed parent is invalid.
            warn!(
                "not signing {}: an embedded unit failed",
                node.path().display()
            );
            self.send(
                tx,
                node,
                SignStatus::Failed("an embedded unit failed to sign".into()),
                None,
            );
            return false;
        }

        if self.cancel.load(Ordering::Relaxed) {
            self.send(tx, node, SignStatus::Failed("cancelled".into()), None);
            return false;
        }

        debug!("signing {}", node.path().display());
        match self.sign_unit(node, is_root) {
            Ok(info) => {
                self.send(tx, node, SignStatus::Signed, Some(info.signature_size));
                true
            }
            Err(e) => {
                warn!("failed to sign {}: {e}", node.path().display());
                self.send(tx, node, SignStatus::Failed(e.to_string()), None);
                false
            }
        }
    }

    fn sign_unit(
        &self,
        node: &BundleNode,
        is_root: bool,
    ) -> std::result::Result<crate::authority::SignatureInfo, SigningError> {
        let entitlements = node
            .embedded_entitlements()
            .unwrap_or_else(|| self.default_entitlements.clone());

        let bundle_id = if is_root {
            self.bundle_id_override
                .clone()
                .unwrap_or_else(|| node.bundle_identifier())
        } else {
            node.bundle_identifier()
        };

        let target = match self.profile_for(node, &bundle_id) {
            Some(profile) => {
                self.embed_profile(node, profile)?;
                SigningTarget::ProfileBased {
                    profile: profile.data().to_vec(),
                    entitlements,
                }
            }
            None => SigningTarget::IdentifierBased {
                bundle_id,
                entitlements,
            },
        };

        let mut builder = SigningConfig::builder(self.identity, target);
        for (key, value) in &self.base_options {
            builder = builder.option(*key, value.clone());
        }
        let config = builder.build()?;

        let request = lower(node.path(), &config)?;
        self.authority.sign(&request)
    }

    /// Profile for a unit: only kinds that carry one, preferring an
    /// identifier-prefix match, falling back to a sole supplied profile.
    fn profile_for(&self, node: &BundleNode, bundle_id: &str) -> Option<&ProvisioningProfile> {
        if !node.kind().carries_profile() || self.profiles.is_empty() {
            return None;
        }
        select_profile(&self.profiles, bundle_id).or_else(|| {
            if self.profiles.len() == 1 {
                self.profiles.first()
            } else {
                None
            }
        })
    }

    fn embed_profile(
        &self,
        node: &BundleNode,
        profile: &ProvisioningProfile,
    ) -> std::result::Result<(), SigningError> {
        let dest = node.path().join("embedded.mobileprovision");
        fs::write(&dest, profile.data())
            .map_err(|e| SigningError::ProfileEmbedFailed(format!("{}: {e}", dest.display())))
    }

    fn send(
        &self,
        tx: &Sender<SigningResult>,
        node: &BundleNode,
        status: SignStatus,
        signature_size: Option<u64>,
    ) {
        // The receiver outlives every worker; a send can only fail if the
        // session already tore down, in which case the result is moot.
        let _ = tx.send(SigningResult {
            path: node.path().to_path_buf(),
            status,
            signature_size,
            timestamp: SystemTime::now(),
        });
    }
}
