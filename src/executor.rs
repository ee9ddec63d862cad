//! Plan executors
//!
//! A [`PlanExecutor`] issues one [`StorageOp`] at a time. The shell executor
//! maps every op onto exactly one external command (or a small amount of
//! direct filesystem work for keyfiles and mount points) and runs it through
//! [`process_guard::run_guarded`]. The dry-run executor only records.

use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;

use crate::engine::reconcile::SystemProbe;
use crate::engine::storage::{KeySource, LvSize, PartitionKind, StorageOp};
use crate::error::{PlannerError, Result};
use crate::process_guard::{CommandOutput, run_guarded};
use crate::types::{FsKind, PartitionTable};

/// Random key material written per LUKS keyfile
pub const KEYFILE_BYTES: usize = 4096;

/// Consumer of a storage plan.
pub trait PlanExecutor {
    /// Run one operation. An error aborts the remaining plan when
    /// [`StorageOp::is_fatal`] holds.
    fn execute(&mut self, op: &StorageOp) -> Result<()>;

    /// Actual size of a volume group after creation, in MiB.
    /// `None` means unknown; the planned sizes are then kept.
    fn volume_group_size_mib(&mut self, vg_name: &str) -> Result<Option<u64>>;
}

// ============================================================================
// Dry run
// ============================================================================

/// Records operations without touching the system.
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    pub executed: Vec<StorageOp>,
    /// Size reported for any volume group, to exercise the shrink path
    pub vg_size_mib: Option<u64>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vg_size(vg_size_mib: u64) -> Self {
        Self {
            executed: Vec::new(),
            vg_size_mib: Some(vg_size_mib),
        }
    }
}

impl PlanExecutor for DryRunExecutor {
    fn execute(&mut self, op: &StorageOp) -> Result<()> {
        log::info!("[dry-run] {}", op);
        self.executed.push(op.clone());
        Ok(())
    }

    fn volume_group_size_mib(&mut self, _vg_name: &str) -> Result<Option<u64>> {
        Ok(self.vg_size_mib)
    }
}

// ============================================================================
// Shell
// ============================================================================

/// Executes operations with the real partitioning tools.
pub struct ShellExecutor {
    /// LUKS passphrase; `KeySource::Password` ops fail without one
    password: Option<String>,
}

impl ShellExecutor {
    pub fn new(password: Option<String>) -> Self {
        Self {
            password: password.filter(|p| !p.is_empty()),
        }
    }

    fn run(&self, context: &str, cmd: &mut Command, stdin: Option<&[u8]>) -> anyhow::Result<CommandOutput> {
        let output = run_guarded(cmd, stdin)?;
        output.ensure_success(context)?;
        Ok(output)
    }

    fn key_input(&self, key: &KeySource) -> anyhow::Result<(Vec<String>, Option<&[u8]>)> {
        match key {
            KeySource::Password => {
                let password = self
                    .password
                    .as_deref()
                    .context("LUKS password requested but none was provided")?;
                Ok((vec!["--key-file=-".to_string()], Some(password.as_bytes())))
            }
            KeySource::Keyfile(path) => Ok((
                vec!["--key-file".to_string(), path.display().to_string()],
                None,
            )),
        }
    }

    fn apply(&self, op: &StorageOp) -> anyhow::Result<()> {
        match op {
            StorageOp::SwapOff { device } => {
                self.run("swapoff", Command::new("swapoff").arg(device), None)?;
            }
            StorageOp::Unmount { target } => {
                self.run("umount", Command::new("umount").args(["-l", target.as_str()]), None)?;
            }
            StorageOp::WipeSignatures { device } => {
                self.run("wipefs", Command::new("wipefs").args(["-a", device.as_str()]), None)?;
            }
            StorageOp::LvRemove { device } => {
                self.run("lvremove", Command::new("lvremove").args(["-f", device.as_str()]), None)?;
            }
            StorageOp::VgRemove { vg_name } => {
                self.run("vgremove", Command::new("vgremove").args(["-f", vg_name.as_str()]), None)?;
            }
            StorageOp::PvRemove { device } => {
                self.run(
                    "pvremove",
                    Command::new("pvremove").args(["-ff", "-y", device.as_str()]),
                    None,
                )?;
            }
            StorageOp::LuksClose { device } => {
                self.run(
                    "cryptsetup luksClose",
                    Command::new("cryptsetup").args(["luksClose", device.as_str()]),
                    None,
                )?;
            }
            StorageOp::ZapDisk { disk } => {
                self.run("sgdisk --zap-all", Command::new("sgdisk").args(["--zap-all", disk.as_str()]), None)?;
            }
            StorageOp::ZeroFill { device, sectors } => {
                self.run(
                    "dd",
                    Command::new("dd").args([
                        "if=/dev/zero".to_string(),
                        format!("of={}", device),
                        "bs=512".to_string(),
                        format!("count={}", sectors),
                        "status=none".to_string(),
                    ]),
                    None,
                )?;
            }
            StorageOp::CreatePartitionTable { disk, table } => {
                if *table == PartitionTable::Gpt {
                    self.run("sgdisk --clear", Command::new("sgdisk").args(["--clear", disk.as_str()]), None)?;
                }
                let label = table.to_string();
                self.run(
                    "parted mklabel",
                    Command::new("parted").args(["-s", disk.as_str(), "mklabel", label.as_str()]),
                    None,
                )?;
            }
            StorageOp::CreatePartition {
                disk,
                number,
                kind,
                start_mib,
                size_mib,
            } => self.create_partition(disk, *number, kind, *start_mib, *size_mib)?,
            StorageOp::SetFlag { disk, number, flag } => {
                self.run(
                    "parted set",
                    Command::new("parted")
                        .args(["-s", disk.as_str(), "set"])
                        .arg(number.to_string())
                        .args([flag.as_str(), "on"]),
                    None,
                )?;
            }
            StorageOp::Partprobe { disk } => {
                self.run("partprobe", Command::new("partprobe").arg(disk), None)?;
            }
            StorageOp::UdevSettle => {
                self.run("udevadm settle", Command::new("udevadm").arg("settle"), None)?;
            }
            StorageOp::GenerateKeyfile { path } => write_keyfile(path)?,
            StorageOp::LuksFormat {
                device,
                cipher,
                key_size,
                key,
            } => {
                let (key_args, stdin) = self.key_input(key)?;
                let mut cmd = Command::new("cryptsetup");
                cmd.args(["luksFormat", "-q", "-c", cipher.as_str(), "-s"])
                    .arg(key_size.to_string());
                cmd.args(&key_args).arg(device);
                self.run("cryptsetup luksFormat", &mut cmd, stdin)?;
            }
            StorageOp::LuksOpen {
                device,
                mapper_name,
                key,
            } => {
                let (key_args, stdin) = self.key_input(key)?;
                let mut cmd = Command::new("cryptsetup");
                cmd.args(["luksOpen", device.as_str(), mapper_name.as_str(), "-q"]).args(&key_args);
                self.run("cryptsetup luksOpen", &mut cmd, stdin)?;
            }
            StorageOp::CreateLvmPv { device } => {
                self.run("pvcreate", Command::new("pvcreate").args(["-f", "-y", device.as_str()]), None)?;
            }
            StorageOp::CreateLvmVg { vg_name, pv_device } => {
                self.run(
                    "vgcreate",
                    Command::new("vgcreate").args(["-f", "-y", vg_name.as_str(), pv_device.as_str()]),
                    None,
                )?;
            }
            StorageOp::CreateLvmLv {
                vg_name,
                lv_name,
                size,
            } => {
                let mut cmd = Command::new("lvcreate");
                cmd.arg("--name").arg(lv_name);
                match size {
                    LvSize::Mib(mib) => cmd.arg("--size").arg(format!("{}M", mib)),
                    LvSize::FreePercent(pct) => cmd.arg("--extents").arg(format!("{}%FREE", pct)),
                };
                cmd.arg(vg_name);
                self.run("lvcreate", &mut cmd, None)?;
            }
            StorageOp::Format { device, fs, label } => {
                let mut cmd = match fs {
                    FsKind::Ext4 => {
                        let mut c = Command::new("mkfs.ext4");
                        c.args(["-q", "-F", "-L", label.as_str(), device.as_str()]);
                        c
                    }
                    FsKind::Vfat => {
                        let mut c = Command::new("mkfs.vfat");
                        c.args(["-F", "32", "-n", label.as_str(), device.as_str()]);
                        c
                    }
                    FsKind::Swap => {
                        let mut c = Command::new("mkswap");
                        c.args(["-L", label.as_str(), device.as_str()]);
                        c
                    }
                };
                self.run(&format!("create {} filesystem", fs), &mut cmd, None)?;
            }
            StorageOp::SwapOn { device } => {
                self.run("swapon", Command::new("swapon").arg(device), None)?;
            }
            StorageOp::Mount {
                device,
                mountpoint,
                fs,
                options,
            } => {
                fs::create_dir_all(mountpoint)
                    .with_context(|| format!("Failed to create {}", mountpoint.display()))?;
                let fs_name = fs.to_string();
                let mut cmd = Command::new("mount");
                cmd.args(["-t", fs_name.as_str(), "-o", options.as_str(), device.as_str()])
                    .arg(mountpoint);
                self.run("mount", &mut cmd, None)?;
                fs::set_permissions(mountpoint, fs::Permissions::from_mode(0o755))?;
            }
            StorageOp::InstallKeyfile { source, dest_dir } => {
                let installed = install_keyfile(source, dest_dir)?;
                log::info!("LUKS keyfile installed at {}", installed.display());
            }
        }
        Ok(())
    }

    fn create_partition(
        &self,
        disk: &str,
        number: u32,
        kind: &PartitionKind,
        start_mib: u64,
        size_mib: Option<u64>,
    ) -> anyhow::Result<()> {
        match kind {
            PartitionKind::Gpt { label, type_code } => {
                let end = size_mib.map_or_else(|| "0".to_string(), |s| format!("+{}M", s));
                self.run(
                    "sgdisk --new",
                    Command::new("sgdisk").args([
                        format!("--new={}:0:{}", number, end),
                        format!("--typecode={}:{}", number, type_code),
                        format!("--change-name={}:{}", number, label),
                        disk.to_string(),
                    ]),
                    None,
                )?;
            }
            PartitionKind::Primary | PartitionKind::Extended | PartitionKind::Logical { .. } => {
                let part_type = match kind {
                    PartitionKind::Extended => "extended",
                    PartitionKind::Logical { .. } => "logical",
                    _ => "primary",
                };
                let end = size_mib.map_or_else(|| "-1s".to_string(), |s| format!("{}MiB", start_mib + s));
                let mut cmd = Command::new("parted");
                cmd.args(["-a", "optimal", "-s", disk, "mkpart", part_type]);
                if let PartitionKind::Logical { swap: true } = kind {
                    cmd.arg("linux-swap");
                }
                cmd.args([format!("{}MiB", start_mib), end]);
                self.run("parted mkpart", &mut cmd, None)?;
            }
        }
        Ok(())
    }
}

impl PlanExecutor for ShellExecutor {
    fn execute(&mut self, op: &StorageOp) -> Result<()> {
        self.apply(op)
            .map_err(|e| PlannerError::executor(format!("{}: {:#}", op, e)))
    }

    fn volume_group_size_mib(&mut self, vg_name: &str) -> Result<Option<u64>> {
        let output = self
            .run("vgdisplay", Command::new("vgdisplay").args(["-c", vg_name]), None)
            .map_err(|e| PlannerError::executor(format!("{:#}", e)))?;
        Ok(parse_vgdisplay_size_mib(&output.stdout))
    }
}

/// Volume group size from `vgdisplay -c`: field 12 is the size in KiB.
pub fn parse_vgdisplay_size_mib(output: &str) -> Option<u64> {
    output
        .lines()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.trim().split(':').nth(11))
        .and_then(|kib| kib.trim().parse::<u64>().ok())
        .map(|kib| kib / 1024)
}

/// Create a keyfile of random bytes with mode 0600.
pub fn write_keyfile(path: &Path) -> anyhow::Result<()> {
    let mut key = vec![0u8; KEYFILE_BYTES];
    fs::File::open("/dev/urandom")
        .and_then(|mut rng| rng.read_exact(&mut key))
        .context("Failed to read /dev/urandom")?;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("Failed to create keyfile {}", path.display()))?;
    file.write_all(&key)?;
    file.sync_all()?;
    log::debug!("Keyfile created: {} ({} bytes)", path.display(), KEYFILE_BYTES);
    Ok(())
}

/// Move a keyfile into `dest_dir` with mode 0400.
pub fn install_keyfile(source: &Path, dest_dir: &Path) -> anyhow::Result<PathBuf> {
    fs::set_permissions(source, fs::Permissions::from_mode(0o400))
        .with_context(|| format!("Can't copy LUKS keyfile {}", source.display()))?;
    fs::create_dir_all(dest_dir)?;
    fs::set_permissions(dest_dir, fs::Permissions::from_mode(0o755))?;

    let name = source
        .file_name()
        .with_context(|| format!("keyfile path {} has no file name", source.display()))?;
    let dest = dest_dir.join(name);
    if fs::rename(source, &dest).is_err() {
        // different filesystems: /tmp is tmpfs, the target is the new disk
        fs::copy(source, &dest)?;
        fs::remove_file(source)?;
    }
    Ok(dest)
}

/// Live-system probe backed by the LVM and util-linux tools.
#[derive(Debug, Default)]
pub struct ShellProbe;

impl ShellProbe {
    fn capture(program: &str, args: &[&str]) -> Result<String> {
        let output = match run_guarded(Command::new(program).args(args), None) {
            Ok(output) => output,
            Err(e) => {
                log::warn!("{} unavailable: {:#}", program, e);
                return Ok(String::new());
            }
        };
        if !output.success() {
            log::warn!("{} {:?} failed: {}", program, args, output.stderr.trim());
            return Ok(String::new());
        }
        Ok(output.stdout)
    }
}

impl SystemProbe for ShellProbe {
    fn swaps(&self) -> Result<String> {
        Self::capture("swapon", &["--show=NAME", "--noheadings"])
    }

    fn mounts(&self) -> Result<String> {
        Self::capture("mount", &[])
    }

    fn logical_volumes(&self) -> Result<String> {
        Self::capture("lvs", &["-o", "lv_name,vg_name,devices", "--noheadings"])
    }

    fn volume_groups(&self) -> Result<String> {
        Self::capture("vgs", &["-o", "vg_name,devices", "--noheadings"])
    }

    fn physical_volumes(&self) -> Result<String> {
        Self::capture("pvs", &["-o", "pv_name", "--noheadings"])
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
