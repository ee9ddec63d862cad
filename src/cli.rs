use clap::{ArgAction, Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

use anyhow::Context;

use crate::config_file::{AutoPartitionConfig, DEFAULT_DEST_DIR};
use crate::types::{BootMode, Bootloader};

/// reborn-planner - disk layout and package download planner for RebornOS
#[derive(Parser)]
#[command(name = "reborn-planner")]
#[command(about = "Plans automatic disk layouts and metalink package downloads for the RebornOS installer")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: print the storage operations instead of running them.
    ///
    /// Read-only probes (swapon, mount, lvs) still execute so the preview
    /// reflects what would be torn down.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Partition a whole disk automatically
    Partition(PartitionArgs),
    /// Validate a partitioning profile without touching the disk
    Validate {
        /// Profile to validate
        profile: PathBuf,
    },
    /// Resolve packages and write a metalink download document
    Metalink(MetalinkArgs),
    /// Print the files of a metalink document as JSON
    Inspect {
        /// Metalink file to read
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct PartitionArgs {
    /// Load the layout choices from a JSON profile
    #[arg(short, long, conflicts_with = "device")]
    pub profile: Option<PathBuf>,

    /// Target disk, e.g. /dev/sda
    #[arg(long, required_unless_present = "profile")]
    pub device: Option<String>,

    /// Where the new system is mounted
    #[arg(long, default_value = DEFAULT_DEST_DIR)]
    pub dest: PathBuf,

    #[arg(long, default_value = "auto")]
    pub boot_mode: BootMode,

    #[arg(long, default_value = "grub2")]
    pub bootloader: Bootloader,

    /// Encrypt root (and home) with LUKS
    #[arg(long)]
    pub luks: bool,

    /// Put root, swap and home on LVM
    #[arg(long)]
    pub lvm: bool,

    /// Create a separate /home
    #[arg(long)]
    pub home: bool,

    /// File holding the LUKS passphrase; keyfiles are generated without it
    #[arg(long)]
    pub password_file: Option<PathBuf>,

    /// Override the detected RAM size
    #[arg(long)]
    pub ram_mib: Option<u64>,

    /// Override the disk size read from sysfs
    #[arg(long)]
    pub size_mib: Option<u64>,

    /// Save the resulting profile to this file
    #[arg(long)]
    pub save_profile: Option<PathBuf>,

    /// Only print sizes and layout
    #[arg(long)]
    pub plan_only: bool,
}

impl PartitionArgs {
    /// Build the profile from a file or from the command line flags.
    pub fn to_config(&self) -> anyhow::Result<AutoPartitionConfig> {
        if let Some(path) = &self.profile {
            return AutoPartitionConfig::load_from_file(path);
        }

        let luks_password = match &self.password_file {
            Some(path) => Some(
                fs::read_to_string(path)
                    .with_context(|| format!("Failed to read password file {:?}", path))?
                    .trim_end_matches('\n')
                    .to_string(),
            ),
            None => None,
        };

        Ok(AutoPartitionConfig {
            device: self.device.clone().unwrap_or_default(),
            dest_dir: self.dest.clone(),
            boot_mode: self.boot_mode,
            bootloader: self.bootloader,
            use_luks: self.luks,
            use_lvm: self.lvm,
            use_home: self.home,
            luks_password,
            ram_mib: self.ram_mib,
            size_mib: self.size_mib,
        })
    }
}

#[derive(Args, Debug)]
pub struct MetalinkArgs {
    /// Package or group names
    pub names: Vec<String>,

    /// Include dependencies that are already installed
    #[arg(long)]
    pub all_deps: bool,

    /// pacman configuration file
    #[arg(short, long, default_value = "/etc/pacman.conf")]
    pub conf: PathBuf,

    /// Overwrite an existing output file
    #[arg(long)]
    pub noconfirm: bool,

    /// Skip dependency resolution
    #[arg(short = 'd', long)]
    pub nodeps: bool,

    /// Skip packages already present in the cache
    #[arg(long)]
    pub needed: bool,

    /// Download signatures: once follows SigLevel, twice always
    #[arg(short, long, action = ArgAction::Count)]
    pub sigs: u8,

    /// Include the sync databases
    #[arg(short = 'y', long = "databases", visible_alias = "refresh")]
    pub databases: bool,

    /// Read packages from a JSON database snapshot instead of libalpm
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Write the document here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["reborn-planner"]).is_err());
    }

    #[test]
    fn test_partition_flags() {
        let cli = Cli::try_parse_from([
            "reborn-planner",
            "--dry-run",
            "partition",
            "--device",
            "/dev/sda",
            "--lvm",
            "--home",
            "--bootloader",
            "systemd-boot",
            "--size-mib",
            "20000",
        ])
        .expect("parse"); // test: known-good args
        assert!(cli.dry_run);
        let Commands::Partition(args) = cli.command else {
            panic!("Expected Partition command");
        };
        let config = args.to_config().expect("flags only"); // test: no files read
        assert_eq!(config.device, "/dev/sda");
        assert!(config.use_lvm && config.use_home && !config.use_luks);
        assert_eq!(config.bootloader, Bootloader::SystemdBoot);
        assert_eq!(config.size_mib, Some(20000));
        assert_eq!(config.dest_dir, PathBuf::from(DEFAULT_DEST_DIR));
    }

    #[test]
    fn test_partition_needs_device_or_profile() {
        assert!(Cli::try_parse_from(["reborn-planner", "partition"]).is_err());
        assert!(Cli::try_parse_from(["reborn-planner", "partition", "-p", "p.json", "--device", "/dev/sda"]).is_err());
        assert!(Cli::try_parse_from(["reborn-planner", "partition", "-p", "p.json"]).is_ok());
    }

    #[test]
    fn test_password_file_is_read() {
        let dir = tempfile::tempdir().expect("tempdir"); // test: tmp is writable
        let path = dir.path().join("pw");
        fs::write(&path, "s3cret\n").expect("write"); // test: tmp is writable

        let cli = Cli::try_parse_from([
            "reborn-planner",
            "partition",
            "--device",
            "/dev/vda",
            "--luks",
            "--password-file",
            path.to_str().expect("utf-8 path"), // test: tempdir paths are ASCII
        ])
        .expect("parse"); // test: known-good args
        let Commands::Partition(args) = cli.command else {
            panic!("Expected Partition command");
        };
        let config = args.to_config().expect("readable file"); // test: just written
        assert_eq!(config.luks_password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_metalink_flags() {
        let cli = Cli::try_parse_from([
            "reborn-planner",
            "metalink",
            "base",
            "gnome",
            "-ss",
            "-y",
            "--needed",
            "-o",
            "/tmp/out.meta4",
        ])
        .expect("parse"); // test: known-good args
        let Commands::Metalink(args) = cli.command else {
            panic!("Expected Metalink command");
        };
        assert_eq!(args.names, vec!["base", "gnome"]);
        assert_eq!(args.sigs, 2);
        assert!(args.databases && args.needed && !args.nodeps);
        assert_eq!(args.conf, PathBuf::from("/etc/pacman.conf"));
    }

    #[test]
    fn test_refresh_alias() {
        let cli = Cli::try_parse_from(["reborn-planner", "metalink", "--refresh"]).expect("parse"); // test: alias exists
        let Commands::Metalink(args) = cli.command else {
            panic!("Expected Metalink command");
        };
        assert!(args.databases);
        assert!(args.names.is_empty());
    }
}
