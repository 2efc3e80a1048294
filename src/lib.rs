//! Build orchestration for native third-party dependencies ("externals").
//!
//! This crate builds one external package per invocation: it loads a
//! declarative manifest, derives the package's identity and on-disk layout,
//! fetches and patches its source, runs its build steps, and optionally
//! hands the staged install tree to an external packaging tool (`fpm`) to
//! produce an RPM or Debian artifact.
//!
//! - **Manifest** - typed read access into the package manifest
//! - **Identity** - canonical names, build paths, artifact filenames
//! - **Dependency resolution** - distro-native deps plus inter-package deps
//! - **Command templates** - placeholder expansion for build steps
//! - **Source acquisition** - clone strategies and patch application
//! - **Executor** - sequential build steps with bounded retry
//! - **Packager** - external packaging tool invocation
//!
//! # Architecture
//!
//! ```text
//! externals-builder <target>
//!     │
//!     ├── manifest:  load spec for <target>
//!     ├── identity:  canonical name, source dir, install prefix, rpath
//!     ├── depends:   distro deps + resolved interdependencies
//!     ├── source:    clone (strategy per manifest) + ordered patches
//!     ├── template:  expand ${PREFIX}, ${JOBS}, ${DEP:...} in each step
//!     ├── executor:  run steps in order, bounded retry
//!     └── package:   fpm invocation, or empty placeholder artifact
//! ```
//!
//! Parallelism across targets belongs to the external multi-target
//! coordinator; within one invocation everything is strictly sequential and
//! the working directories of distinct targets are disjoint by construction.

pub mod context;
pub mod depends;
pub mod executor;
pub mod identity;
pub mod manifest;
pub mod package;
pub mod pipeline;
pub mod preflight;
pub mod source;
pub mod template;

pub use context::{BuildContext, DistroFamily, DistroTarget, PackageFormat};
pub use manifest::{Manifest, ManifestError, PackageSpec};
pub use pipeline::{build_target, write_packages_file, BuildOptions};
