//! Reconciliation of leftover system state
//!
//! Before a disk is repartitioned, whatever a previous (possibly failed)
//! installation left behind must go: swap and mounts inside the destination
//! directory or on the target disk, LVM volumes living on it, and the LUKS
//! mapper devices this installer opens. This module probes the live system
//! through [`SystemProbe`] and turns the findings into teardown
//! [`StorageOp`]s. Nothing found means no ops, so repeating it is a no-op.
//!
//! The caller must hold exclusive access to the target device while the
//! teardown and the following plan run.

use std::collections::BTreeSet;
use std::path::Path;

use crate::engine::layout::{LUKS_HOME_NAME, LUKS_ROOT_NAME, is_on_device, mapper_path};
use crate::engine::storage::StorageOp;
use crate::error::Result;

/// Read-only view of the live system's block-device state.
///
/// Each method returns the raw output of the corresponding command so the
/// parsers below stay pure.
pub trait SystemProbe {
    /// `swapon --show=NAME --noheadings`
    fn swaps(&self) -> Result<String>;
    /// `mount`
    fn mounts(&self) -> Result<String>;
    /// `lvs -o lv_name,vg_name,devices --noheadings`
    fn logical_volumes(&self) -> Result<String>;
    /// `vgs -o vg_name,devices --noheadings`
    fn volume_groups(&self) -> Result<String>;
    /// `pvs -o pv_name --noheadings`
    fn physical_volumes(&self) -> Result<String>;
    fn path_exists(&self, path: &Path) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvEntry {
    pub lv_name: String,
    pub vg_name: String,
    pub devices: String,
}

impl LvEntry {
    pub fn path(&self) -> String {
        format!("/dev/{}/{}", self.vg_name, self.lv_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VgEntry {
    pub vg_name: String,
    pub devices: String,
}

/// Active swap devices, zram excluded.
pub fn parse_swaps(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty() && !name.contains("/dev/zram"))
        .map(str::to_string)
        .collect()
}

/// `<source> on <target> type <fs> (<opts>)` lines.
pub fn parse_mounts(output: &str) -> Vec<MountEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let _on = fields.next()?;
            let target = fields.next()?;
            Some(MountEntry {
                source: source.to_string(),
                target: target.to_string(),
            })
        })
        .collect()
}

/// Rows of `lvs -o lv_name,vg_name,devices`. Malformed rows are skipped.
pub fn parse_lvs(output: &str) -> Vec<LvEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some(LvEntry {
                lv_name: fields.next()?.to_string(),
                vg_name: fields.next()?.to_string(),
                devices: fields.next()?.to_string(),
            })
        })
        .collect()
}

/// Rows of `vgs -o vg_name,devices`.
pub fn parse_vgs(output: &str) -> Vec<VgEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some(VgEntry {
                vg_name: fields.next()?.to_string(),
                devices: fields.next()?.to_string(),
            })
        })
        .collect()
}

/// Rows of `pvs -o pv_name`.
pub fn parse_pvs(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|pv| !pv.is_empty())
        .map(str::to_string)
        .collect()
}

/// Device paths of an LVM `devices` column, e.g. `/dev/sda3(0),/dev/sdb1(0)`.
pub fn device_paths(devices: &str) -> impl Iterator<Item = &str> {
    devices
        .split(',')
        .map(|dev| dev.split('(').next().unwrap_or(dev).trim())
        .filter(|dev| !dev.is_empty())
}

fn lists_device(devices: &str, device: &str) -> bool {
    device_paths(devices).any(|dev| is_on_device(dev, device))
}

fn is_within(path: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    path == dir
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Build the teardown ops for a target device and destination directory.
///
/// Order: swap off, unmount everything below `dest_dir` (deepest first, the
/// directory itself last), unmount partitions of `device`, remove LVM
/// volumes/groups/PVs on `device`, close the installer's LUKS mappings.
pub fn reconcile_ops(probe: &dyn SystemProbe, device: &str, dest_dir: &Path) -> Result<Vec<StorageOp>> {
    let mut ops = Vec::new();

    for swap in parse_swaps(&probe.swaps()?) {
        ops.push(StorageOp::SwapOff { device: swap });
    }

    let mounts = parse_mounts(&probe.mounts()?);
    let dest = dest_dir.to_string_lossy();
    let dest = dest.trim_end_matches('/');

    let mut inside: Vec<&str> = mounts
        .iter()
        .map(|m| m.target.as_str())
        .filter(|target| is_within(target, dest) && *target != dest)
        .collect();
    inside.sort_by_key(|target| std::cmp::Reverse(target.len()));
    inside.dedup();
    let mut unmounted: BTreeSet<String> = BTreeSet::new();
    for target in inside {
        if unmounted.insert(target.to_string()) {
            ops.push(StorageOp::Unmount {
                target: target.to_string(),
            });
        }
    }
    if mounts.iter().any(|m| m.target == dest) {
        unmounted.insert(dest.to_string());
        ops.push(StorageOp::Unmount {
            target: dest.to_string(),
        });
    }

    for entry in &mounts {
        if is_on_device(&entry.source, device) && !unmounted.contains(&entry.target) {
            unmounted.insert(entry.target.clone());
            ops.push(StorageOp::Unmount {
                target: entry.source.clone(),
            });
        }
    }

    for lv in parse_lvs(&probe.logical_volumes()?) {
        if lists_device(&lv.devices, device) {
            let path = lv.path();
            ops.push(StorageOp::WipeSignatures {
                device: path.clone(),
            });
            ops.push(StorageOp::LvRemove { device: path });
        }
    }

    let mut removed_vgs = BTreeSet::new();
    for vg in parse_vgs(&probe.volume_groups()?) {
        if lists_device(&vg.devices, device) && removed_vgs.insert(vg.vg_name.clone()) {
            ops.push(StorageOp::VgRemove {
                vg_name: vg.vg_name,
            });
        }
    }

    for pv in parse_pvs(&probe.physical_volumes()?) {
        if is_on_device(&pv, device) {
            ops.push(StorageOp::PvRemove { device: pv });
        }
    }

    for name in [LUKS_ROOT_NAME, LUKS_HOME_NAME] {
        let mapper = mapper_path(name);
        if probe.path_exists(Path::new(&mapper)) {
            ops.push(StorageOp::LuksClose { device: mapper });
        }
    }

    log::debug!("Reconciliation of {} produced {} ops", device, ops.len());
    Ok(ops)
}
