//! Artifact packaging via the external `fpm` tool.
//!
//! Packaging never hard-fails on an empty optional component: declared
//! staging directories that do not exist are skipped with a log line, and if
//! nothing at all is staged the stage degrades to writing an empty
//! placeholder file at the computed artifact filename so the downstream
//! coordinator still finds the file it expects.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::context::BuildContext;
use crate::depends;
use crate::identity;
use crate::manifest::Manifest;

/// Vendor string stamped into artifact metadata.
const VENDOR: &str = "externals-mirror";

/// Package one built target, producing either a real artifact or an empty
/// placeholder at `<script_root>/<artifact_filename>`.
///
/// Returns the artifact path.
pub fn create_package(manifest: &Manifest, name: &str, ctx: &BuildContext) -> Result<PathBuf> {
    let spec = manifest.package(name)?;
    let filename = identity::artifact_filename(spec, ctx)?;
    let output = ctx.script_root.join(&filename);
    let install_prefix = identity::install_prefix(spec, ctx)?;
    let local_name = identity::local_path_name(spec)?;
    let externals_root = spec.externals_root()?.to_string();

    // Relative staged paths handed to fpm, rooted at the source dir.
    let mut staged = Vec::new();
    for dir in &spec.package_directories {
        let absolute = install_prefix.join(dir);
        if absolute.is_dir() {
            let files = WalkDir::new(&absolute)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .count();
            debug!("staging '{}' ({} files)", absolute.display(), files);
            staged.push(format!("{}/{}/{}", externals_root, local_name, dir));
        } else {
            info!(
                "declared package directory '{}' not present under '{}', skipping",
                dir,
                install_prefix.display()
            );
        }
    }

    if staged.is_empty() {
        info!(
            "no staged directories for '{}', writing placeholder artifact '{}'",
            name, filename
        );
        File::create(&output)
            .with_context(|| format!("creating placeholder artifact '{}'", output.display()))?;
        return Ok(output);
    }

    let args = fpm_args(manifest, name, ctx, &output, &staged)?;
    info!("packaging '{}' as '{}'", name, filename);
    debug!("fpm {}", args.join(" "));

    let status = Command::new("fpm")
        .args(&args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .context("failed to execute fpm")?;
    if !status.success() {
        bail!(
            "fpm failed with exit code {} while packaging '{}'",
            status.code().unwrap_or(-1),
            name
        );
    }

    Ok(output)
}

/// Compose the fpm argument vector for one target.
fn fpm_args(
    manifest: &Manifest,
    name: &str,
    ctx: &BuildContext,
    output: &Path,
    staged: &[String],
) -> Result<Vec<String>> {
    let spec = manifest.package(name)?;
    let canonical = identity::canonical_name(spec)?;
    let revision = identity::artifact_revision(spec, &ctx.target);
    let source_dir = identity::source_dir(spec, ctx)?;

    let mut args: Vec<String> = vec![
        "-s".into(),
        "dir".into(),
        "-t".into(),
        ctx.package_format().extension().into(),
        "-n".into(),
        canonical,
        "-v".into(),
        identity::ARTIFACT_VERSION.into(),
        "-a".into(),
        ctx.arch_label().into(),
        "--iteration".into(),
        revision,
        "--license".into(),
        spec.license_or_default().into(),
        "--vendor".into(),
        VENDOR.into(),
        "--description".into(),
        format!("{} {}", spec.name(), spec.version()?),
        "-p".into(),
        output.to_string_lossy().into_owned(),
    ];

    for dep in depends::resolve(manifest, name, ctx)? {
        args.push("-d".into());
        args.push(dep);
    }

    args.push("-C".into());
    args.push(source_dir.to_string_lossy().into_owned());
    args.extend(staged.iter().cloned());

    Ok(args)
}
