//! Canonical package identity and on-disk layout derivation.
//!
//! Everything here is a pure function of a [`PackageSpec`] plus the
//! [`BuildContext`]; nothing is cached or persisted. Two distinct layout
//! roots are in play: source checkouts and install prefixes live under the
//! build-time script root, while the runtime library path baked into
//! binaries points at [`DEPLOY_ROOT`], where the artifacts land after
//! installation on a customer machine.

use std::path::PathBuf;

use crate::context::{BuildContext, DistroTarget, PackageFormat};
use crate::manifest::{ManifestError, PackageSpec};

/// Namespace prefix of every canonical package name.
pub const NAME_PREFIX: &str = "ext";

/// Artifact version is fixed; the upstream version lives in the canonical
/// name instead, so every (version, build) pair is its own package.
pub const ARTIFACT_VERSION: &str = "1.0";

/// Deployment root the runtime library path points at.
pub const DEPLOY_ROOT: &str = "/opt/externals";

/// Fully qualified package identifier: `ext-<name><version>-<build>`.
pub fn canonical_name(spec: &PackageSpec) -> Result<String, ManifestError> {
    Ok(format!("{}-{}", NAME_PREFIX, local_path_name(spec)?))
}

/// Directory-name form of the identity: `<name><version>-<build>`.
pub fn local_path_name(spec: &PackageSpec) -> Result<String, ManifestError> {
    Ok(format!(
        "{}{}-{}",
        spec.name(),
        spec.version()?,
        spec.build_number()?
    ))
}

/// Where the package's source tree is checked out.
pub fn source_dir(spec: &PackageSpec, ctx: &BuildContext) -> Result<PathBuf, ManifestError> {
    Ok(ctx
        .script_root
        .join(format!("{}_src", local_path_name(spec)?)))
}

/// Staging install prefix under the source tree.
///
/// Build steps install into this directory; the packager stages out of it.
pub fn install_prefix(spec: &PackageSpec, ctx: &BuildContext) -> Result<PathBuf, ManifestError> {
    Ok(source_dir(spec, ctx)?
        .join(spec.externals_root()?)
        .join(local_path_name(spec)?))
}

/// Path under a package's install prefix, used to locate already-built
/// dependency binaries and headers.
pub fn local_path(
    spec: &PackageSpec,
    ctx: &BuildContext,
    extra: &[&str],
) -> Result<PathBuf, ManifestError> {
    let mut path = install_prefix(spec, ctx)?;
    for segment in extra {
        path.push(segment);
    }
    Ok(path)
}

/// Runtime library search path baked into built binaries.
///
/// Points at the post-install deployment location, not the build tree.
pub fn runtime_lib_path(spec: &PackageSpec) -> Result<String, ManifestError> {
    Ok(format!("{}/{}/lib", DEPLOY_ROOT, local_path_name(spec)?))
}

/// Artifact revision: manifest `package_revision` (default `"0"`) plus a
/// distro suffix in the target ecosystem's convention.
pub fn artifact_revision(spec: &PackageSpec, target: &DistroTarget) -> String {
    let revision = spec.package_revision_or_default();
    match target.family.package_format() {
        PackageFormat::Rpm => format!("{}.el{}", revision, target.version_major()),
        PackageFormat::Deb => format!("{}+deb{}", revision, target.version_major()),
    }
}

/// Deterministic artifact filename for this package on this target.
///
/// RPM and Debian compose the same fields differently:
/// `name-version-revision.arch.rpm` vs `name_version-revision_arch.deb`.
pub fn artifact_filename(spec: &PackageSpec, ctx: &BuildContext) -> Result<String, ManifestError> {
    let name = canonical_name(spec)?;
    let revision = artifact_revision(spec, &ctx.target);
    let arch = ctx.arch_label();
    let filename = match ctx.package_format() {
        PackageFormat::Rpm => format!(
            "{}-{}-{}.{}.{}",
            name,
            ARTIFACT_VERSION,
            revision,
            arch,
            PackageFormat::Rpm.extension()
        ),
        PackageFormat::Deb => format!(
            "{}_{}-{}_{}.{}",
            name,
            ARTIFACT_VERSION,
            revision,
            arch,
            PackageFormat::Deb.extension()
        ),
    };
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DistroFamily;
    use crate::manifest::Manifest;

    fn spec(toml: &str) -> PackageSpec {
        let value: toml::Value = toml::from_str(toml).unwrap();
        let manifest = Manifest::from_document(serde_json::to_value(value).unwrap()).unwrap();
        let name = manifest.names().next().unwrap().to_string();
        manifest.package(&name).unwrap().clone()
    }

    fn rpm_ctx() -> BuildContext {
        BuildContext::new(
            DistroTarget::new(DistroFamily::RedHat, "8.6"),
            "x86_64",
            PathBuf::from("/build/externals"),
        )
    }

    fn deb_ctx() -> BuildContext {
        BuildContext::new(
            DistroTarget::new(DistroFamily::Debian, "10"),
            "x86_64",
            PathBuf::from("/build/externals"),
        )
    }

    #[test]
    fn canonical_name_is_deterministic() {
        let spec = spec(
            r#"
            [zlib]
            version = "1.2.11"
            build = "3"
            "#,
        );
        assert_eq!(canonical_name(&spec).unwrap(), "ext-zlib1.2.11-3");
        assert_eq!(canonical_name(&spec).unwrap(), canonical_name(&spec).unwrap());
    }

    #[test]
    fn layout_paths_nest_under_the_script_root() {
        let spec = spec(
            r#"
            [zlib]
            version = "1.2.11"
            build = "3"
            externals_root = "opt/externals"
            "#,
        );
        let ctx = rpm_ctx();
        assert_eq!(
            source_dir(&spec, &ctx).unwrap(),
            PathBuf::from("/build/externals/zlib1.2.11-3_src")
        );
        assert_eq!(
            install_prefix(&spec, &ctx).unwrap(),
            PathBuf::from("/build/externals/zlib1.2.11-3_src/opt/externals/zlib1.2.11-3")
        );
        assert_eq!(
            local_path(&spec, &ctx, &["include", "zlib.h"]).unwrap(),
            PathBuf::from(
                "/build/externals/zlib1.2.11-3_src/opt/externals/zlib1.2.11-3/include/zlib.h"
            )
        );
    }

    #[test]
    fn runtime_lib_path_points_at_the_deploy_root() {
        let spec = spec(
            r#"
            [zlib]
            version = "1.2.11"
            build = "3"
            externals_root = "opt/externals"
            "#,
        );
        assert_eq!(
            runtime_lib_path(&spec).unwrap(),
            "/opt/externals/zlib1.2.11-3/lib"
        );
    }

    #[test]
    fn rpm_filename_composition() {
        let spec = spec(
            r#"
            [zlib]
            version = "1.2.11"
            build = "3"
            package_revision = "2"
            "#,
        );
        assert_eq!(
            artifact_filename(&spec, &rpm_ctx()).unwrap(),
            "ext-zlib1.2.11-3-1.0-2.el8.x86_64.rpm"
        );
    }

    #[test]
    fn deb_filename_composition() {
        let spec = spec(
            r#"
            [zlib]
            version = "1.2.11"
            build = "3"
            "#,
        );
        assert_eq!(
            artifact_filename(&spec, &deb_ctx()).unwrap(),
            "ext-zlib1.2.11-3_1.0-0+deb10_amd64.deb"
        );
    }

    #[test]
    fn missing_version_propagates_as_missing_field() {
        let spec = spec(
            r#"
            [zlib]
            build = "3"
            "#,
        );
        assert!(matches!(
            canonical_name(&spec),
            Err(ManifestError::MissingField { ref field, .. }) if *field == "version"
        ));
    }
}
