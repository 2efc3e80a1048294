//! One-target build orchestration.
//!
//! The control flow is strictly sequential: manifest lookup, derived paths,
//! source acquisition, patches, template expansion, build steps, optional
//! packaging. Parallelism across targets belongs to the external
//! coordinator, which invokes this once per target; distinct targets never
//! share working directories.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::context::BuildContext;
use crate::executor::{self, BuildEnv, RetryPolicy};
use crate::identity;
use crate::manifest::{Manifest, PackageSpec};
use crate::package;
use crate::source::{self, AcquireStrategy};
use crate::template::{self, TokenValues};

/// Caller knobs for one target build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Run the packaging stage after the build steps.
    pub package: bool,
    pub retry: RetryPolicy,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            package: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Build (and optionally package) one manifest target.
pub fn build_target(
    manifest: &Manifest,
    name: &str,
    ctx: &BuildContext,
    opts: &BuildOptions,
) -> Result<()> {
    let spec = manifest.package(name)?;
    validate_required(spec)?;

    let source_dir = identity::source_dir(spec, ctx)?;
    let install_prefix = identity::install_prefix(spec, ctx)?;
    info!(
        "building '{}' ({}) in '{}'",
        name,
        identity::canonical_name(spec)?,
        source_dir.display()
    );

    let strategy = AcquireStrategy::for_package(spec)?;
    source::acquire(&strategy, &source_dir)
        .with_context(|| format!("acquiring source for '{}'", name))?;
    source::apply_patches(spec, ctx, &source_dir)
        .with_context(|| format!("patching source for '{}'", name))?;

    fs::create_dir_all(&install_prefix)
        .with_context(|| format!("creating install prefix '{}'", install_prefix.display()))?;

    let env = BuildEnv::for_package(manifest, spec, ctx)?;
    let values = token_values(manifest, spec, ctx, &env)?;

    let mut steps = Vec::new();
    for step in spec.build_steps.iter().chain(&spec.external_build_steps) {
        let expanded = template::expand(step, &values)
            .with_context(|| format!("expanding build step for '{}': {}", name, step))?;
        steps.push(expanded);
    }

    executor::run_steps(&steps, &source_dir, &env, opts.retry)
        .with_context(|| format!("building '{}'", name))?;

    if opts.package {
        let artifact = package::create_package(manifest, name, ctx)
            .with_context(|| format!("packaging '{}'", name))?;
        info!("artifact: {}", artifact.display());
    } else {
        info!("build-only mode, skipping packaging for '{}'", name);
    }

    Ok(())
}

/// Where the generated package mapping file lives.
pub fn packages_file_path(ctx: &BuildContext) -> PathBuf {
    ctx.script_root.join("packagesfile")
}

/// Generate the build-variable mapping file consumed by the multi-target
/// coordinator: one `VARIABLE=artifact_filename` line per manifest package,
/// variable names uppercased with hyphens turned into underscores.
pub fn write_packages_file(manifest: &Manifest, ctx: &BuildContext, path: &Path) -> Result<()> {
    let mut out = String::new();
    for name in manifest.names() {
        let spec = manifest.package(name)?;
        let filename = identity::artifact_filename(spec, ctx)
            .with_context(|| format!("computing artifact filename for '{}'", name))?;
        let variable = name.to_uppercase().replace('-', "_");
        out.push_str(&variable);
        out.push('=');
        out.push_str(&filename);
        out.push('\n');
    }

    fs::write(path, out)
        .with_context(|| format!("writing packages file '{}'", path.display()))?;
    info!("wrote packages file '{}'", path.display());
    Ok(())
}

/// Fail fast on the fields every build/package operation requires.
fn validate_required(spec: &PackageSpec) -> Result<()> {
    spec.version()?;
    spec.build_number()?;
    spec.externals_root()?;
    spec.commitish()?;
    Ok(())
}

fn token_values(
    manifest: &Manifest,
    spec: &PackageSpec,
    ctx: &BuildContext,
    env: &BuildEnv,
) -> Result<TokenValues> {
    let prefix = identity::install_prefix(spec, ctx)?;
    let mut values = TokenValues::new(
        prefix.to_string_lossy().into_owned(),
        env.cc_command(),
        env.cxx_command(),
        template::job_count(),
        identity::runtime_lib_path(spec)?,
    );

    for dep_name in &spec.dependencies {
        let dep_spec = manifest
            .package(dep_name)
            .with_context(|| format!("resolving dependency root for '{}'", spec.name()))?;
        let root = identity::install_prefix(dep_spec, ctx)?;
        values = values.with_dep_root(dep_name, root.to_string_lossy().into_owned());
    }

    Ok(values)
}
