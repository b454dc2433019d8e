//! Bundle discovery: finding every signable unit inside a bundle tree.
//!
//! [`discover`] builds a [`BundleNode`] tree rooted at the bundle being
//! signed. Nested units live under the conventional container directories
//! (`Frameworks/`, `PlugIns/`, `Extensions/`, `Watch/`); standalone dynamic
//! libraries anywhere inside a unit are leaves of that unit.
//!
//! The tree's [`post_order`](BundleNode::post_order) sequence is the signing
//! order: every descendant strictly before its ancestor. Signing a parent
//! before an embedded child would invalidate the parent's seal as soon as
//! the child is re-signed.
//!
//! Discovery performs no signing and no mutation. Symlinks are followed;
//! cycles are detected via visited-path tracking and reported as
//! [`DiscoveryError::CyclicLink`] instead of looping.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use plist::Value;
use walkdir::WalkDir;

use crate::config::Entitlements;
use crate::error::DiscoveryError;
use crate::profile::ProvisioningProfile;
use crate::{Error, Result};

/// Directories conventionally holding nested signable units.
const CHILD_CONTAINERS: &[&str] = &["Frameworks", "PlugIns", "Extensions", "Watch"];

/// Kind of a signable unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BundleKind {
    Application,
    Framework,
    PlugIn,
    Extension,
    Dylib,
    Other,
}

impl BundleKind {
    /// Classify a path by its extension.
    pub fn of(path: &Path) -> BundleKind {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("app") => BundleKind::Application,
            Some("framework") => BundleKind::Framework,
            Some("bundle") | Some("plugin") => BundleKind::PlugIn,
            Some("appex") => BundleKind::Extension,
            Some("dylib") => BundleKind::Dylib,
            _ => BundleKind::Other,
        }
    }

    /// Whether units of this kind carry their own embedded provisioning
    /// profile. Frameworks, plugins and dylibs never do.
    pub fn carries_profile(self) -> bool {
        matches!(self, BundleKind::Application | BundleKind::Extension)
    }
}

/// One signable unit inside a bundle tree.
#[derive(Clone, Debug)]
pub struct BundleNode {
    path: PathBuf,
    kind: BundleKind,
    children: Vec<BundleNode>,
}

impl BundleNode {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> BundleKind {
        self.kind
    }

    pub fn children(&self) -> &[BundleNode] {
        &self.children
    }

    /// Number of nodes in this subtree, this node included.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(BundleNode::count).sum::<usize>()
    }

    /// Lazy post-order traversal: children strictly before parents.
    pub fn post_order(&self) -> PostOrder<'_> {
        PostOrder {
            stack: vec![(self, 0)],
        }
    }

    /// Unit identifier from `Info.plist`, falling back to the file stem.
    pub fn bundle_identifier(&self) -> String {
        self.info_plist_string("CFBundleIdentifier")
            .unwrap_or_else(|| self.file_stem())
    }

    /// Main executable path: `CFBundleExecutable` from `Info.plist`, file
    /// stem as fallback. For a dylib the unit is its own executable.
    pub fn main_executable(&self) -> PathBuf {
        if self.kind == BundleKind::Dylib {
            return self.path.clone();
        }
        let name = self
            .info_plist_string("CFBundleExecutable")
            .unwrap_or_else(|| self.file_stem());
        self.path.join(name)
    }

    /// Entitlements embedded in the unit's own provisioning profile, if the
    /// unit carries one. These take precedence over session defaults.
    pub fn embedded_entitlements(&self) -> Option<Entitlements> {
        let profile_path = self.path.join("embedded.mobileprovision");
        if !profile_path.is_file() {
            return None;
        }
        let profile = ProvisioningProfile::from_path(&profile_path).ok()?;
        profile.entitlements().cloned()
    }

    fn info_plist_string(&self, key: &str) -> Option<String> {
        let plist_path = self.path.join("Info.plist");
        let data = fs::read(plist_path).ok()?;
        let value: Value = plist::from_bytes(&data).ok()?;
        value
            .as_dictionary()?
            .get(key)
            .and_then(Value::as_string)
            .map(str::to_string)
    }

    fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

/// Lazy post-order iterator over a [`BundleNode`] tree.
pub struct PostOrder<'a> {
    stack: Vec<(&'a BundleNode, usize)>,
}

impl<'a> Iterator for PostOrder<'a> {
    type Item = &'a BundleNode;

    fn next(&mut self) -> Option<&'a BundleNode> {
        loop {
            let (node, next_child) = self.stack.last_mut()?;
            if *next_child < node.children.len() {
                let child = &node.children[*next_child];
                *next_child += 1;
                self.stack.push((child, 0));
            } else {
                let (node, _) = self.stack.pop().expect("non-empty stack");
                return Some(node);
            }
        }
    }
}

/// Discover every signable unit under `root`.
///
/// Returns the unit tree; [`BundleNode::post_order`] yields the signing
/// sequence. Fails with [`DiscoveryError::NotFound`] when `root` does not
/// exist and [`DiscoveryError::CyclicLink`] when symlinks form a cycle.
pub fn discover(root: impl AsRef<Path>) -> Result<BundleNode> {
    let root = root.as_ref();
    if !root.exists() {
        return Err(DiscoveryError::NotFound(root.to_path_buf()).into());
    }

    let mut visited = HashSet::new();
    let node = build_node(root, &mut visited)?;
    debug!("discovered {} signable unit(s) under {}", node.count(), root.display());
    Ok(node)
}

fn build_node(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<BundleNode> {
    let canonical = fs::canonicalize(path).map_err(|e| map_io(e, path))?;
    if !visited.insert(canonical) {
        return Err(DiscoveryError::CyclicLink(path.to_path_buf()).into());
    }

    let kind = BundleKind::of(path);
    let mut children = Vec::new();

    // A dylib is always a leaf.
    if kind != BundleKind::Dylib {
        for child_path in child_unit_paths(path)? {
            children.push(build_node(&child_path, visited)?);
        }
    }

    Ok(BundleNode {
        path: path.to_path_buf(),
        kind,
        children,
    })
}

/// Immediate child units of a bundle directory: nested bundles under the
/// conventional containers, plus standalone dylibs anywhere inside the unit
/// that do not belong to a nested bundle.
fn child_unit_paths(bundle_path: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    let mut it = WalkDir::new(bundle_path)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = it.next() {
        let entry = entry.map_err(|e| map_walkdir(e, bundle_path))?;
        let path = entry.path();

        if entry.file_type().is_dir() {
            if is_nested_bundle(path, bundle_path) {
                paths.push(path.to_path_buf());
                // The nested unit owns everything beneath it.
                it.skip_current_dir();
            }
            continue;
        }

        if BundleKind::of(path) == BundleKind::Dylib
            && !path
                .components()
                .any(|c| c.as_os_str() == "_CodeSignature")
        {
            paths.push(path.to_path_buf());
        }
    }

    Ok(paths)
}

/// A directory is a nested unit when it has a bundle extension and sits
/// under one of the conventional child containers of this bundle.
fn is_nested_bundle(path: &Path, bundle_path: &Path) -> bool {
    if matches!(BundleKind::of(path), BundleKind::Dylib | BundleKind::Other) {
        return false;
    }
    let relative = match path.strip_prefix(bundle_path) {
        Ok(r) => r,
        Err(_) => return false,
    };
    match relative.iter().next().and_then(|c| c.to_str()) {
        Some(first) => CHILD_CONTAINERS.contains(&first),
        None => false,
    }
}

fn map_io(err: io::Error, path: &Path) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => DiscoveryError::NotFound(path.to_path_buf()).into(),
        io::ErrorKind::PermissionDenied => {
            DiscoveryError::PermissionDenied(path.to_path_buf()).into()
        }
        _ => Error::Io(err),
    }
}

fn map_walkdir(err: walkdir::Error, bundle_path: &Path) -> Error {
    if let Some(ancestor) = err.loop_ancestor() {
        return DiscoveryError::CyclicLink(ancestor.to_path_buf()).into();
    }
    let path = err
        .path()
        .unwrap_or(bundle_path)
        .to_path_buf();
    match err.io_error().map(io::Error::kind) {
        Some(io::ErrorKind::PermissionDenied) => DiscoveryError::PermissionDenied(path).into(),
        Some(io::ErrorKind::NotFound) => DiscoveryError::NotFound(path).into(),
        _ => Error::Io(err.into()),
    }
}
