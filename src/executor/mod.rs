//! Sequential build-step execution.
//!
//! Steps run as `sh -c <step>` in the package's source directory, in
//! manifest order, each already template-expanded. A step may be retried a
//! bounded number of times with a fixed pause; exhausting the retries aborts
//! the target build with no partial-success bookkeeping - re-invocation from
//! scratch is the recovery path.
//!
//! Compiler selection is an explicit [`BuildEnv`] value applied to each
//! spawned command. Packages flagged `system_toolchain` build with the host
//! compiler; everything else builds with the already-built local toolchain
//! when the manifest declares one. The process environment itself is never
//! mutated.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::context::BuildContext;
use crate::identity;
use crate::manifest::{Manifest, PackageSpec};

/// Compiler and search-path overrides for one target's build steps.
#[derive(Debug, Clone, Default)]
pub struct BuildEnv {
    cc: Option<PathBuf>,
    cxx: Option<PathBuf>,
    path_prepend: Option<PathBuf>,
}

impl BuildEnv {
    /// The host environment, untouched. Used for the bootstrap packages.
    pub fn host() -> Self {
        Self::default()
    }

    /// Compute the environment for building `spec`.
    ///
    /// Packages flagged `system_toolchain` get the host environment. For the
    /// rest, if the manifest declares a `toolchain` package, its staged
    /// `bin/` supplies `CC`/`CXX` and is prepended to the search path.
    pub fn for_package(
        manifest: &Manifest,
        spec: &PackageSpec,
        ctx: &BuildContext,
    ) -> Result<Self> {
        if spec.system_toolchain {
            return Ok(Self::host());
        }

        let Some(toolchain) = manifest
            .names()
            .map(|name| manifest.package(name))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .find(|candidate| candidate.toolchain)
        else {
            return Ok(Self::host());
        };

        let bin = identity::local_path(toolchain, ctx, &["bin"]).with_context(|| {
            format!(
                "locating toolchain '{}' for building '{}'",
                toolchain.name(),
                spec.name()
            )
        })?;

        Ok(Self {
            cc: Some(bin.join("gcc")),
            cxx: Some(bin.join("g++")),
            path_prepend: Some(bin),
        })
    }

    /// C compiler this environment selects, as a command string.
    pub fn cc_command(&self) -> String {
        match &self.cc {
            Some(path) => path.to_string_lossy().into_owned(),
            None => "gcc".to_string(),
        }
    }

    /// C++ compiler this environment selects, as a command string.
    pub fn cxx_command(&self) -> String {
        match &self.cxx {
            Some(path) => path.to_string_lossy().into_owned(),
            None => "g++".to_string(),
        }
    }

    fn apply(&self, cmd: &mut Command) -> Result<()> {
        if let Some(cc) = &self.cc {
            cmd.env("CC", cc);
        }
        if let Some(cxx) = &self.cxx {
            cmd.env("CXX", cxx);
        }
        if let Some(bin) = &self.path_prepend {
            let mut paths = vec![bin.clone()];
            if let Some(current) = env::var_os("PATH") {
                paths.extend(env::split_paths(&current));
            }
            let joined = env::join_paths(paths)
                .with_context(|| format!("prepending '{}' to PATH", bin.display()))?;
            cmd.env("PATH", joined);
        }
        Ok(())
    }
}

/// Bounded retry configuration for build steps.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub retries: u32,
    /// Fixed pause between attempts. No backoff.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_secs(10),
        }
    }
}

/// Run one expanded build step, retrying per `retry`.
pub fn run_step(step: &str, cwd: &Path, env: &BuildEnv, retry: RetryPolicy) -> Result<()> {
    let total_attempts = retry.retries + 1;

    for attempt in 1..=total_attempts {
        debug!("running step (attempt {}/{}): {}", attempt, total_attempts, step);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(step)
            .current_dir(cwd)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        env.apply(&mut cmd)?;

        let status = cmd
            .status()
            .with_context(|| format!("failed to spawn build step: {}", step))?;

        if status.success() {
            return Ok(());
        }

        let code = status.code().unwrap_or(-1);
        if attempt < total_attempts {
            warn!(
                "build step failed with exit code {} (attempt {}/{}), retrying in {:?}",
                code, attempt, total_attempts, retry.delay
            );
            thread::sleep(retry.delay);
        } else {
            bail!(
                "build step failed with exit code {} after {} attempts: {}",
                code,
                total_attempts,
                step
            );
        }
    }

    unreachable!("retry loop returns or bails on the last attempt");
}

/// Run a package's expanded steps in order, stopping at the first step that
/// exhausts its retries.
pub fn run_steps(steps: &[String], cwd: &Path, env: &BuildEnv, retry: RetryPolicy) -> Result<()> {
    for (index, step) in steps.iter().enumerate() {
        info!("step {}/{}: {}", index + 1, steps.len(), step);
        run_step(step, cwd, env, retry)
            .with_context(|| format!("build step {} of {}", index + 1, steps.len()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DistroFamily, DistroTarget};
    use tempfile::TempDir;

    fn manifest(toml: &str) -> Manifest {
        let value: toml::Value = toml::from_str(toml).unwrap();
        Manifest::from_document(serde_json::to_value(value).unwrap()).unwrap()
    }

    fn ctx(root: &Path) -> BuildContext {
        BuildContext::new(
            DistroTarget::new(DistroFamily::RedHat, "8"),
            "x86_64",
            root.to_path_buf(),
        )
    }

    fn no_delay(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            delay: Duration::from_millis(0),
        }
    }

    /// Shell snippet that fails until its attempt counter reaches `passing`.
    fn counter_step(counter: &Path, passing: u32) -> String {
        format!(
            "n=$(cat {c} 2>/dev/null || echo 0); n=$((n+1)); echo $n > {c}; test $n -ge {p}",
            c = counter.display(),
            p = passing
        )
    }

    #[test]
    fn step_that_recovers_within_retries_succeeds() {
        let tmp = TempDir::new().unwrap();
        let counter = tmp.path().join("attempts");

        // Fails on attempts 1 and 2, succeeds on attempt 3.
        let step = counter_step(&counter, 3);
        run_step(&step, tmp.path(), &BuildEnv::host(), no_delay(2)).unwrap();
        assert_eq!(std::fs::read_to_string(&counter).unwrap().trim(), "3");
    }

    #[test]
    fn step_that_fails_every_attempt_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let counter = tmp.path().join("attempts");

        let step = counter_step(&counter, 99);
        let err = run_step(&step, tmp.path(), &BuildEnv::host(), no_delay(1)).unwrap_err();
        assert!(err.to_string().contains("after 2 attempts"));
        // Exactly retries + 1 attempts were made.
        assert_eq!(std::fs::read_to_string(&counter).unwrap().trim(), "2");
    }

    #[test]
    fn failed_step_halts_the_sequence() {
        let tmp = TempDir::new().unwrap();
        let witness = tmp.path().join("witness");

        let steps = vec![
            "exit 1".to_string(),
            format!("touch {}", witness.display()),
        ];
        assert!(run_steps(&steps, tmp.path(), &BuildEnv::host(), no_delay(0)).is_err());
        assert!(!witness.exists(), "later steps must not run after a failure");
    }

    #[test]
    fn system_toolchain_packages_build_with_the_host_compiler() {
        let manifest = manifest(
            r#"
            [gcc]
            version = "8.3"
            build = "1"
            externals_root = "opt/externals"
            toolchain = true

            [cmake]
            version = "3.12"
            build = "1"
            system_toolchain = true
            "#,
        );
        let tmp = TempDir::new().unwrap();
        let env = BuildEnv::for_package(
            &manifest,
            manifest.package("cmake").unwrap(),
            &ctx(tmp.path()),
        )
        .unwrap();
        assert_eq!(env.cc_command(), "gcc");
        assert_eq!(env.cxx_command(), "g++");
    }

    #[test]
    fn other_packages_build_with_the_staged_toolchain() {
        let manifest = manifest(
            r#"
            [gcc]
            version = "8.3"
            build = "1"
            externals_root = "opt/externals"
            toolchain = true

            [zlib]
            version = "1.2.11"
            build = "3"
            "#,
        );
        let tmp = TempDir::new().unwrap();
        let env = BuildEnv::for_package(
            &manifest,
            manifest.package("zlib").unwrap(),
            &ctx(tmp.path()),
        )
        .unwrap();
        assert!(env.cc_command().ends_with("gcc8.3-1_src/opt/externals/gcc8.3-1/bin/gcc"));
        assert!(env.cxx_command().ends_with("bin/g++"));
    }

    #[test]
    fn no_declared_toolchain_falls_back_to_host() {
        let manifest = manifest(
            r#"
            [zlib]
            version = "1.2.11"
            build = "3"
            "#,
        );
        let tmp = TempDir::new().unwrap();
        let env = BuildEnv::for_package(
            &manifest,
            manifest.package("zlib").unwrap(),
            &ctx(tmp.path()),
        )
        .unwrap();
        assert_eq!(env.cc_command(), "gcc");
    }
}
