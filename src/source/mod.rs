//! Source acquisition and patch application.
//!
//! Acquisition is a closed set of strategies selected from manifest data and
//! entered once per invocation. The on-disk presence of the source directory
//! is the sole idempotence marker: if it exists, nothing is fetched.
//!
//! Patches are re-attempted unconditionally every invocation, each guarded
//! by its own `--dry-run` pass. A failing dry run aborts the build before
//! the tree is touched; a failing real apply aborts with a warning that the
//! tree may be partially patched. There is no rollback - the recovery path
//! is a rebuild from scratch, which acquisition idempotence keeps cheap.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::context::BuildContext;
use crate::manifest::{PackageSpec, SourceKind};

/// How a package's source tree is brought into the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireStrategy {
    /// Depth-1 clone of a branch or tag straight into the source dir.
    ShallowClone { repository: String, reference: String },

    /// Full-history clone followed by an explicit checkout, for packages
    /// pinned to an arbitrary commit a shallow clone cannot reach.
    FullCloneThenCheckout { repository: String, commitish: String },

    /// Depth-1 clone of a tag into a nested subdirectory of the source dir
    /// (toolchain monorepos keep their own layout under the working dir).
    SpecialLayoutClone {
        repository: String,
        reference: String,
        subdir: String,
    },

    /// No upstream repository; just create the working directory.
    NoSource,
}

impl AcquireStrategy {
    /// Select the strategy from the package's manifest data.
    pub fn for_package(spec: &PackageSpec) -> Result<Self> {
        let strategy = match spec.source_kind()? {
            SourceKind::None => AcquireStrategy::NoSource,
            SourceKind::Toolchain => AcquireStrategy::SpecialLayoutClone {
                repository: spec.repository_url(),
                reference: spec.commitish()?.to_string(),
                subdir: spec.name().to_string(),
            },
            SourceKind::Git if spec.track_commit => AcquireStrategy::FullCloneThenCheckout {
                repository: spec.repository_url(),
                commitish: spec.commitish()?.to_string(),
            },
            SourceKind::Git => AcquireStrategy::ShallowClone {
                repository: spec.repository_url(),
                reference: spec.commitish()?.to_string(),
            },
        };
        Ok(strategy)
    }
}

/// What [`acquire`] actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Source dir already existed; nothing was fetched.
    Reused,
    /// Source was cloned from upstream.
    Fetched,
    /// Working directory was created empty (no upstream).
    Created,
}

/// Bring the package source into `source_dir`.
///
/// Idempotent: an existing source dir short-circuits every strategy,
/// including the network-touching ones.
pub fn acquire(strategy: &AcquireStrategy, source_dir: &Path) -> Result<AcquireOutcome> {
    if source_dir.exists() {
        info!(
            "source dir '{}' already present, skipping acquisition",
            source_dir.display()
        );
        return Ok(AcquireOutcome::Reused);
    }

    match strategy {
        AcquireStrategy::NoSource => {
            fs::create_dir_all(source_dir).with_context(|| {
                format!("creating working directory '{}'", source_dir.display())
            })?;
            Ok(AcquireOutcome::Created)
        }
        AcquireStrategy::ShallowClone {
            repository,
            reference,
        } => {
            info!("cloning {} (ref {}, depth 1)", repository, reference);
            run_git(&[
                "clone",
                "--depth",
                "1",
                "--branch",
                reference,
                repository,
                &source_dir.to_string_lossy(),
            ])?;
            Ok(AcquireOutcome::Fetched)
        }
        AcquireStrategy::FullCloneThenCheckout {
            repository,
            commitish,
        } => {
            info!("cloning {} (full history)", repository);
            run_git(&["clone", repository, &source_dir.to_string_lossy()])?;
            run_git(&[
                "-C",
                &source_dir.to_string_lossy(),
                "checkout",
                commitish,
            ])?;
            Ok(AcquireOutcome::Fetched)
        }
        AcquireStrategy::SpecialLayoutClone {
            repository,
            reference,
            subdir,
        } => {
            fs::create_dir_all(source_dir).with_context(|| {
                format!("creating working directory '{}'", source_dir.display())
            })?;
            let nested = source_dir.join(subdir);
            info!(
                "cloning {} (ref {}) into '{}'",
                repository,
                reference,
                nested.display()
            );
            run_git(&[
                "clone",
                "--depth",
                "1",
                "--branch",
                reference,
                repository,
                &nested.to_string_lossy(),
            ])?;
            Ok(AcquireOutcome::Fetched)
        }
    }
}

/// Apply the package's patches, in manifest order, inside `source_dir`.
pub fn apply_patches(spec: &PackageSpec, ctx: &BuildContext, source_dir: &Path) -> Result<()> {
    for patch in spec.patches() {
        let patch_file = patch_path(ctx, patch);
        if !patch_file.exists() {
            bail!(
                "patch '{}' for package '{}' not found at '{}'",
                patch,
                spec.name(),
                patch_file.display()
            );
        }

        info!("validating patch '{}' (dry run)", patch);
        let dry_run = run_patch(source_dir, &patch_file, true)?;
        if !dry_run.success() {
            bail!(
                "patch '{}' failed dry-run validation in '{}'; \
                 aborting before modifying the tree",
                patch,
                source_dir.display()
            );
        }

        info!("applying patch '{}'", patch);
        let applied = run_patch(source_dir, &patch_file, false)?;
        if !applied.success() {
            warn!(
                "patch '{}' failed mid-apply; '{}' may be partially patched",
                patch,
                source_dir.display()
            );
            bail!("applying patch '{}' in '{}'", patch, source_dir.display());
        }
    }
    Ok(())
}

/// Where a patch identifier resolves on disk.
pub fn patch_path(ctx: &BuildContext, patch: &str) -> PathBuf {
    ctx.script_root.join("patches").join(patch)
}

fn run_git(args: &[&str]) -> Result<()> {
    let status = Command::new("git")
        .args(args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .context("failed to execute git")?;
    if !status.success() {
        bail!(
            "git {} failed with exit code {}",
            args.first().copied().unwrap_or(""),
            status.code().unwrap_or(-1)
        );
    }
    Ok(())
}

fn run_patch(source_dir: &Path, patch_file: &Path, dry_run: bool) -> Result<std::process::ExitStatus> {
    let mut cmd = Command::new("patch");
    cmd.arg("-p1").arg("--forward");
    if dry_run {
        cmd.arg("--dry-run");
    }
    cmd.arg("-i").arg(patch_file);
    cmd.current_dir(source_dir)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("failed to execute patch for '{}'", patch_file.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DistroFamily, DistroTarget};
    use crate::manifest::Manifest;
    use tempfile::TempDir;

    fn spec(toml: &str) -> PackageSpec {
        let value: toml::Value = toml::from_str(toml).unwrap();
        let manifest = Manifest::from_document(serde_json::to_value(value).unwrap()).unwrap();
        let name = manifest.names().next().unwrap().to_string();
        manifest.package(&name).unwrap().clone()
    }

    fn ctx(root: &Path) -> BuildContext {
        BuildContext::new(
            DistroTarget::new(DistroFamily::RedHat, "8"),
            "x86_64",
            root.to_path_buf(),
        )
    }

    #[test]
    fn strategy_defaults_to_shallow_clone() {
        let spec = spec(
            r#"
            [zlib]
            version = "1.2.11"
            build = "3"
            commitish = "v1.2.11"
            "#,
        );
        assert_eq!(
            AcquireStrategy::for_package(&spec).unwrap(),
            AcquireStrategy::ShallowClone {
                repository: "https://github.com/externals-mirror/zlib.git".to_string(),
                reference: "v1.2.11".to_string(),
            }
        );
    }

    #[test]
    fn track_commit_selects_full_clone() {
        let spec = spec(
            r#"
            [icu]
            version = "62.1"
            build = "1"
            commitish = "abc123def"
            track_commit = true
            repository = "https://example.com/icu.git"
            "#,
        );
        assert_eq!(
            AcquireStrategy::for_package(&spec).unwrap(),
            AcquireStrategy::FullCloneThenCheckout {
                repository: "https://example.com/icu.git".to_string(),
                commitish: "abc123def".to_string(),
            }
        );
    }

    #[test]
    fn toolchain_source_selects_nested_layout() {
        let spec = spec(
            r#"
            [gcc]
            version = "8.3"
            build = "1"
            commitish = "releases/gcc-8.3.0"
            source = "toolchain"
            "#,
        );
        assert!(matches!(
            AcquireStrategy::for_package(&spec).unwrap(),
            AcquireStrategy::SpecialLayoutClone { ref subdir, .. } if subdir == "gcc"
        ));
    }

    #[test]
    fn no_source_creates_the_working_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("uwc1.0-1_src");
        let outcome = acquire(&AcquireStrategy::NoSource, &dir).unwrap();
        assert_eq!(outcome, AcquireOutcome::Created);
        assert!(dir.is_dir());
    }

    #[test]
    fn existing_source_dir_short_circuits_acquisition() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("zlib1.2.11-3_src");
        fs::create_dir_all(&dir).unwrap();

        // A bogus repository proves no network/git work happens: the call
        // would fail if the clone were attempted.
        let strategy = AcquireStrategy::ShallowClone {
            repository: "https://invalid.invalid/nowhere.git".to_string(),
            reference: "v0".to_string(),
        };
        assert_eq!(acquire(&strategy, &dir).unwrap(), AcquireOutcome::Reused);
        assert_eq!(acquire(&strategy, &dir).unwrap(), AcquireOutcome::Reused);
    }

    #[test]
    fn missing_patch_file_is_fatal_before_any_tool_runs() {
        let tmp = TempDir::new().unwrap();
        let ctx = ctx(tmp.path());
        let spec = spec(
            r#"
            [zlib]
            version = "1.2.11"
            build = "3"
            patches = ["zlib-cve-fix.patch"]
            "#,
        );
        let source = tmp.path().join("src");
        fs::create_dir_all(&source).unwrap();

        let err = apply_patches(&spec, &ctx, &source).unwrap_err();
        assert!(err.to_string().contains("zlib-cve-fix.patch"));
    }

    #[test]
    fn no_patches_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let ctx = ctx(tmp.path());
        let spec = spec(
            r#"
            [zlib]
            version = "1.2.11"
            build = "3"
            "#,
        );
        let source = tmp.path().join("src");
        fs::create_dir_all(&source).unwrap();
        apply_patches(&spec, &ctx, &source).unwrap();
    }
}
