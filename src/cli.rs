//! Minimal CLI: create | check the package manifest
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use crate::manifest::{self, Manifest, ManifestCheck};
use crate::resolver::FileResolver;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// build task-argument schemas and maintain the package manifest
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// build the manifest and write it next to the package sources
    Create(CreateManifest),
    /// rebuild the manifest and compare it against the on-disk copy
    Check(CheckManifest),
}

#[derive(Args, Debug, Clone)]
struct PackageSettings {
    /// package name, e.g. 'my-task-package' (normalized internally)
    #[arg(long)]
    package: String,

    /// directory containing the package sources
    #[arg(long, default_value = ".")]
    package_root: PathBuf,

    /// manifest format version
    #[arg(long, default_value = manifest::MANIFEST_VERSION)]
    manifest_version: String,
}

#[derive(clap::Parser, Debug)]
struct CreateManifest {
    #[command(flatten)]
    package_settings: PackageSettings,
}

#[derive(clap::Parser, Debug)]
struct CheckManifest {
    #[command(flatten)]
    package_settings: PackageSettings,

    /// compare dictionaries without regard to key order
    #[arg(long)]
    ignore_keys_order: bool,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl PackageSettings {
    fn build_manifest(&self) -> anyhow::Result<Manifest> {
        let mut resolver = FileResolver::new();
        let manifest = manifest::create_manifest(
            &self.package_root,
            &self.package,
            &self.manifest_version,
            &mut resolver,
        )?;
        Ok(manifest)
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> anyhow::Result<()> {
        match &self.cmd {
            Command::Create(target) => {
                let settings = &target.package_settings;
                let manifest = settings.build_manifest()?;
                let path = manifest::write_manifest_to_file(
                    &settings.package_root,
                    &settings.package,
                    &manifest,
                )?;
                println!("{} {}", "Wrote".green(), path.display());
                Ok(())
            }
            Command::Check(target) => {
                let settings = &target.package_settings;
                let manifest = settings.build_manifest()?;
                let outcome = manifest::check_manifest(
                    &settings.package_root,
                    &settings.package,
                    &manifest,
                    target.ignore_keys_order,
                )?;
                match outcome {
                    ManifestCheck::UpToDate => {
                        println!("{}", "On-disk manifest is up to date.".green());
                        Ok(())
                    }
                    ManifestCheck::Outdated { old, new, errors } => {
                        println!("{}", serde_json::to_string_pretty(&old)?);
                        println!("{}", serde_json::to_string_pretty(&new)?);
                        for entry in errors.entries() {
                            eprintln!(
                                "{} {}",
                                entry.path.yellow(),
                                entry.message.red()
                            );
                        }
                        anyhow::bail!(
                            "New/old manifests differ ({} differences)",
                            errors.total()
                        )
                    }
                }
            }
        }
    }
}
