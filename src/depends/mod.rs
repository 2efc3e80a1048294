//! Runtime dependency list resolution.

use anyhow::{Context, Result};

use crate::context::BuildContext;
use crate::identity;
use crate::manifest::Manifest;

/// Ordered runtime dependency specifiers for one package.
///
/// Distro-native specifiers come first, then each interdependency resolved
/// to its canonical name, both groups in manifest order. A name that shows
/// up in both groups yields a duplicate specifier in the output; that is the
/// documented contract, not an oversight, and the packaging tool tolerates
/// it.
pub fn resolve(manifest: &Manifest, name: &str, ctx: &BuildContext) -> Result<Vec<String>> {
    let spec = manifest.package(name)?;

    let mut specifiers: Vec<String> = spec
        .distro_dependencies(ctx.target.family.id(), ctx.target.version_major())
        .to_vec();

    for dep_name in &spec.dependencies {
        let dep_spec = manifest
            .package(dep_name)
            .with_context(|| format!("resolving interdependency of '{}'", name))?;
        let canonical = identity::canonical_name(dep_spec)
            .with_context(|| format!("naming interdependency '{}' of '{}'", dep_name, name))?;
        specifiers.push(canonical);
    }

    Ok(specifiers)
}
