//! Package manifest loading and typed field access.
//!
//! The manifest is a single document mapping package name -> package spec,
//! written in either TOML or JSON (dispatched on file extension). One
//! reserved key, [`COMMENTS_KEY`], holds freeform commentary and is excluded
//! from the package map at load time.
//!
//! Every other component goes through this module; nothing else reads the
//! manifest file. Fields that a build or packaging run requires are exposed
//! as accessors returning [`ManifestError::MissingField`] naming the package
//! and field - a JSON `null` and an absent key are the same thing here.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

/// Reserved manifest key holding freeform commentary.
///
/// Excluded from every "list all packages" operation, including the
/// generated packages mapping file.
pub const COMMENTS_KEY: &str = "comments";

/// Base URL for the convention repository of packages that omit `repository`.
const DEFAULT_REPOSITORY_BASE: &str = "https://github.com/externals-mirror";

/// Errors from manifest lookup and field access.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The requested package key does not exist in the manifest.
    #[error("package '{0}' not found in manifest")]
    UnknownPackage(String),

    /// A field required for building or packaging is absent or null.
    #[error("package '{package}' is missing required field '{field}'")]
    MissingField {
        package: String,
        field: &'static str,
    },

    /// A field is present but holds a value outside its closed set.
    #[error("package '{package}' has unsupported value '{value}' for field '{field}'")]
    UnsupportedValue {
        package: String,
        field: &'static str,
        value: String,
    },
}

/// How a package's source tree is obtained.
///
/// Selected by the manifest `source` field; the default is [`SourceKind::Git`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Generic git repository checkout.
    Git,
    /// Toolchain-style monorepo: a single tag cloned into a nested
    /// subdirectory of the source dir instead of the source dir itself.
    Toolchain,
    /// No upstream repository; the working directory is created empty and
    /// only local build steps run.
    None,
}

/// One package's declarative build description.
///
/// Fields a build or packaging run requires are `Option` so that an
/// explicit `null` in a JSON manifest behaves exactly like an absent key.
/// Unknown manifest fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageSpec {
    /// Manifest key; filled in at load time, not part of the document.
    #[serde(skip)]
    name: String,

    version: Option<String>,
    build: Option<String>,
    externals_root: Option<String>,
    license: Option<String>,
    commitish: Option<String>,
    repository: Option<String>,
    source: Option<String>,
    package_revision: Option<String>,

    #[serde(default)]
    patches: Vec<String>,
    #[serde(default)]
    pub build_steps: Vec<String>,
    #[serde(default)]
    pub external_build_steps: Vec<String>,
    #[serde(default)]
    pub package_directories: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    distro_dependencies: BTreeMap<String, BTreeMap<String, Vec<String>>>,

    #[serde(default)]
    pub track_commit: bool,
    #[serde(default)]
    pub toolchain: bool,
    #[serde(default)]
    pub system_toolchain: bool,
}

impl PackageSpec {
    /// Manifest key this spec was loaded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upstream version string, e.g. `"1.2.11"`. Required.
    pub fn version(&self) -> Result<&str, ManifestError> {
        self.required(&self.version, "version")
    }

    /// Local build number, e.g. `"3"`. Required.
    pub fn build_number(&self) -> Result<&str, ManifestError> {
        self.required(&self.build, "build")
    }

    /// Install-path segment under the source dir, e.g. `"opt/externals"`.
    /// Required.
    pub fn externals_root(&self) -> Result<&str, ManifestError> {
        self.required(&self.externals_root, "externals_root")
    }

    /// Branch, tag, or commit SHA to build. Required.
    pub fn commitish(&self) -> Result<&str, ManifestError> {
        self.required(&self.commitish, "commitish")
    }

    /// License string for packaging metadata; `"Unknown"` when absent.
    pub fn license_or_default(&self) -> &str {
        self.license.as_deref().unwrap_or("Unknown")
    }

    /// Package revision for artifact naming; `"0"` when absent.
    pub fn package_revision_or_default(&self) -> &str {
        self.package_revision.as_deref().unwrap_or("0")
    }

    /// Source repository URL; falls back to the convention URL derived from
    /// the package name.
    pub fn repository_url(&self) -> String {
        match &self.repository {
            Some(url) => url.clone(),
            None => format!("{}/{}.git", DEFAULT_REPOSITORY_BASE, self.name),
        }
    }

    /// Acquisition layout declared by the `source` field.
    pub fn source_kind(&self) -> Result<SourceKind, ManifestError> {
        match self.source.as_deref() {
            None | Some("git") => Ok(SourceKind::Git),
            Some("toolchain") => Ok(SourceKind::Toolchain),
            Some("none") => Ok(SourceKind::None),
            Some(other) => Err(ManifestError::UnsupportedValue {
                package: self.name.clone(),
                field: "source",
                value: other.to_string(),
            }),
        }
    }

    /// Ordered patch identifiers, resolved later against the patches
    /// directory.
    pub fn patches(&self) -> &[String] {
        &self.patches
    }

    /// Distro-native dependency specifiers for (family, version), in manifest
    /// order. Absence of either level is an empty list, not an error.
    pub fn distro_dependencies(&self, family: &str, version: &str) -> &[String] {
        self.distro_dependencies
            .get(family)
            .and_then(|versions| versions.get(version))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn required<'a>(
        &self,
        field: &'a Option<String>,
        name: &'static str,
    ) -> Result<&'a str, ManifestError> {
        field.as_deref().ok_or_else(|| ManifestError::MissingField {
            package: self.name.clone(),
            field: name,
        })
    }
}

/// The loaded manifest: package name -> spec, reserved key excluded.
#[derive(Debug, Clone)]
pub struct Manifest {
    packages: BTreeMap<String, PackageSpec>,
}

impl Manifest {
    /// Load a manifest document from disk.
    ///
    /// `.json` parses as JSON; everything else parses as TOML. Both land in
    /// the same in-memory representation.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading manifest '{}'", path.display()))?;

        let document: serde_json::Value = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&text)
                .with_context(|| format!("parsing JSON manifest '{}'", path.display()))?
        } else {
            let value: toml::Value = toml::from_str(&text)
                .with_context(|| format!("parsing TOML manifest '{}'", path.display()))?;
            serde_json::to_value(value)
                .with_context(|| format!("normalizing manifest '{}'", path.display()))?
        };

        Self::from_document(document)
            .with_context(|| format!("loading manifest '{}'", path.display()))
    }

    /// Build a manifest from an already-parsed document.
    pub fn from_document(document: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(entries) = document else {
            anyhow::bail!("manifest root must be a table of package name -> spec");
        };

        let mut packages = BTreeMap::new();
        for (name, value) in entries {
            if name == COMMENTS_KEY {
                continue;
            }
            let mut spec: PackageSpec = serde_json::from_value(value)
                .with_context(|| format!("parsing spec for package '{}'", name))?;
            spec.name = name.clone();
            packages.insert(name, spec);
        }

        Ok(Self { packages })
    }

    /// Look up one package by manifest key.
    pub fn package(&self, name: &str) -> Result<&PackageSpec, ManifestError> {
        self.packages
            .get(name)
            .ok_or_else(|| ManifestError::UnknownPackage(name.to_string()))
    }

    /// Every package name, reserved commentary key excluded.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }
}
