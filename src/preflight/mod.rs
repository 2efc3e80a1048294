//! Preflight checks for required host tools.
//!
//! Validates that the external collaborators exist before a build starts.
//! This prevents cryptic mid-build errors after a long clone or compile.

use anyhow::{bail, Result};

/// Tools every build invocation shells out to.
///
/// Each tuple is (command_name, package_name).
pub const BUILD_TOOLS: &[(&str, &str)] = &[("git", "git"), ("patch", "patch")];

/// Additional tools needed when packaging is requested.
pub const PACKAGING_TOOLS: &[(&str, &str)] = &[("fpm", "rubygem-fpm")];

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// Returns `Err` listing every missing tool and the package providing it.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !command_exists(tool) {
            missing.push((*tool, *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check the tools a build needs; include the packaging tools unless the
/// caller asked for build-only mode.
pub fn check_host_tools(packaging: bool) -> Result<()> {
    check_required_tools(BUILD_TOOLS)?;
    if packaging {
        check_required_tools(PACKAGING_TOOLS)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("ls"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("ls", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn test_check_required_tools_failure_lists_the_package() {
        let tools = &[("nonexistent_command_xyz", "fake-package")];
        let err = check_required_tools(tools).unwrap_err();
        assert!(err.to_string().contains("fake-package"));
    }
}
