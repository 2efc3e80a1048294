//! Process-wide build context.
//!
//! One immutable value describing the machine we are building on and the
//! directory the orchestrator runs from. It is computed once per invocation
//! and threaded as a parameter into every stage; no stage mutates global
//! state to communicate these facts.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};

/// Packaging ecosystem of the target distro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    Rpm,
    Deb,
}

impl PackageFormat {
    /// Artifact filename extension.
    pub fn extension(self) -> &'static str {
        match self {
            PackageFormat::Rpm => "rpm",
            PackageFormat::Deb => "deb",
        }
    }

    /// Architecture label as this ecosystem spells it.
    ///
    /// RPM uses the raw machine string; Debian renames the common ones.
    pub fn arch_label<'a>(self, machine: &'a str) -> &'a str {
        match self {
            PackageFormat::Rpm => machine,
            PackageFormat::Deb => match machine {
                "x86_64" => "amd64",
                "aarch64" => "arm64",
                other => other,
            },
        }
    }
}

/// Distro family of the build host, which fixes the packaging ecosystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistroFamily {
    RedHat,
    Debian,
}

impl DistroFamily {
    /// Identifier used as the first-level key of `distro_dependencies`.
    pub fn id(self) -> &'static str {
        match self {
            DistroFamily::RedHat => "redhat",
            DistroFamily::Debian => "debian",
        }
    }

    pub fn package_format(self) -> PackageFormat {
        match self {
            DistroFamily::RedHat => PackageFormat::Rpm,
            DistroFamily::Debian => PackageFormat::Deb,
        }
    }

    fn from_os_release_id(id: &str) -> Option<Self> {
        match id {
            "rhel" | "centos" | "rocky" | "almalinux" | "fedora" | "amzn" => {
                Some(DistroFamily::RedHat)
            }
            "debian" | "ubuntu" => Some(DistroFamily::Debian),
            _ => None,
        }
    }
}

/// The distro this invocation builds for: family plus version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistroTarget {
    pub family: DistroFamily,
    /// VERSION_ID from os-release, e.g. `"8.6"` or `"10"`.
    pub version: String,
}

impl DistroTarget {
    pub fn new(family: DistroFamily, version: impl Into<String>) -> Self {
        Self {
            family,
            version: version.into(),
        }
    }

    /// Leading numeric run of the version string, e.g. `"8.6"` -> `"8"`.
    pub fn version_major(&self) -> &str {
        let end = self
            .version
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.version.len());
        &self.version[..end]
    }
}

/// Everything path and identity derivation needs, fixed for one invocation.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub target: DistroTarget,
    /// Host machine string from `uname -m`, e.g. `"x86_64"`.
    pub machine: String,
    /// Directory the orchestrator runs from; source checkouts, the patches
    /// directory, and emitted artifacts all live under it.
    pub script_root: PathBuf,
}

impl BuildContext {
    pub fn new(target: DistroTarget, machine: impl Into<String>, script_root: PathBuf) -> Self {
        Self {
            target,
            machine: machine.into(),
            script_root,
        }
    }

    /// Detect the context from the running host.
    pub fn detect(script_root: PathBuf) -> Result<Self> {
        let target = detect_distro_target(Path::new("/etc/os-release"))?;
        let machine = detect_machine()?;
        Ok(Self::new(target, machine, script_root))
    }

    pub fn package_format(&self) -> PackageFormat {
        self.target.family.package_format()
    }

    /// Architecture label for artifact filenames on this target.
    pub fn arch_label(&self) -> &str {
        self.package_format().arch_label(&self.machine)
    }
}

fn detect_machine() -> Result<String> {
    let output = Command::new("uname")
        .arg("-m")
        .output()
        .context("running 'uname -m' to detect the host architecture")?;
    if !output.status.success() {
        bail!(
            "'uname -m' failed with exit code {}",
            output.status.code().unwrap_or(-1)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn detect_distro_target(os_release: &Path) -> Result<DistroTarget> {
    let text = fs::read_to_string(os_release)
        .with_context(|| format!("reading '{}' to detect the distro", os_release.display()))?;
    parse_os_release(&text).with_context(|| {
        format!(
            "detecting a supported distro family from '{}'",
            os_release.display()
        )
    })
}

fn parse_os_release(text: &str) -> Result<DistroTarget> {
    let mut id = None;
    let mut version_id = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("ID=") {
            id = Some(value.trim_matches('"').to_string());
        } else if let Some(value) = line.strip_prefix("VERSION_ID=") {
            version_id = Some(value.trim_matches('"').to_string());
        }
    }

    let id = id.context("os-release has no ID field")?;
    let version = version_id.context("os-release has no VERSION_ID field")?;
    let family = DistroFamily::from_os_release_id(&id)
        .with_context(|| format!("unsupported distro '{}'", id))?;

    Ok(DistroTarget { family, version })
}
