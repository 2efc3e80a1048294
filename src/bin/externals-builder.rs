//! CLI entry point: build one external package, or generate the package
//! mapping file for the multi-target coordinator.

use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use externals_builder::pipeline::{self, BuildOptions};
use externals_builder::{preflight, BuildContext, Manifest};

/// Reserved target name that generates the mapping file instead of building.
const PACKAGES_FILE_TARGET: &str = "packagesfile";

#[derive(Parser)]
#[command(name = "externals-builder")]
#[command(version, about = "Build native external dependencies from source", long_about = None)]
struct Cli {
    /// Increase verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long)]
    quiet: bool,

    /// Package the target after building (the default).
    #[arg(long, conflicts_with = "no_package")]
    package: bool,

    /// Build only; skip the packaging stage.
    #[arg(long)]
    no_package: bool,

    /// Manifest document (TOML or JSON), relative to the current directory.
    #[arg(long, default_value = "externals.toml")]
    manifest: PathBuf,

    /// Manifest package name, or 'packagesfile' to generate the
    /// build-variable mapping file.
    target: String,
}

fn main() {
    // Usage errors exit 1 like every other fatal condition, not clap's
    // default 2. Help and version output stay successful.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let code = match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            process::exit(code);
        }
    };

    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    if let Err(err) = run(cli) {
        error!("{:#}", err);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let script_root = env::current_dir().context("resolving current directory")?;
    let manifest_path = if cli.manifest.is_absolute() {
        cli.manifest.clone()
    } else {
        script_root.join(&cli.manifest)
    };

    let ctx = BuildContext::detect(script_root)?;
    let manifest = Manifest::load(&manifest_path)?;

    if cli.target == PACKAGES_FILE_TARGET {
        let path = pipeline::packages_file_path(&ctx);
        return pipeline::write_packages_file(&manifest, &ctx, &path);
    }

    let package = cli.package || !cli.no_package;
    preflight::check_host_tools(package)?;

    let opts = BuildOptions {
        package,
        ..BuildOptions::default()
    };
    pipeline::build_target(&manifest, &cli.target, &ctx, &opts)
}
