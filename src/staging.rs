//! Staged partition edits
//!
//! Manual partitioning collects the user's per-partition choices before
//! anything is written. Each choice is a [`PendingPartitionOp`] keyed by a
//! [`PartitionId`] built from the owning disk and the partition's start/end
//! sectors, so the key stays valid while device numbers shift during editing.
//!
//! Once the user confirms, [`StagingTable::changes`] lists what will happen
//! and [`StagingTable::storage_ops`] produces the format/mount operations for
//! the same [`PlanExecutor`](crate::executor::PlanExecutor) the automatic
//! layout uses.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::engine::storage::{StorageOp, join_target};
use crate::hardware::FirmwareMode;
use crate::types::FsKind;

/// Longest label the staging table keeps
pub const MAX_LABEL_LEN: usize = 16;

/// Stable identity of a partition on a disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PartitionId {
    pub disk: String,
    pub start: u64,
    pub end: u64,
}

impl PartitionId {
    pub fn new(disk: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            disk: disk.into(),
            start,
            end,
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.disk, self.start, self.end)
    }
}

/// What the user staged for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingPartitionOp {
    /// Partition created in this session
    New {
        label: String,
        mount: String,
        /// `None` for partitions that are never formatted (extended, BIOS boot)
        fs: Option<FsKind>,
        format: bool,
    },
    /// Existing partition with new settings
    Modify {
        label: String,
        mount: String,
        fs: Option<FsKind>,
        format: bool,
    },
}

impl PendingPartitionOp {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New { .. })
    }

    pub fn label(&self) -> &str {
        match self {
            Self::New { label, .. } | Self::Modify { label, .. } => label,
        }
    }

    pub fn mount(&self) -> &str {
        match self {
            Self::New { mount, .. } | Self::Modify { mount, .. } => mount,
        }
    }

    pub fn fs(&self) -> Option<FsKind> {
        match self {
            Self::New { fs, .. } | Self::Modify { fs, .. } => *fs,
        }
    }

    /// Whether the partition gets a fresh filesystem.
    ///
    /// Root is always formatted; new partitions are formatted unless they
    /// carry no filesystem at all.
    pub fn will_format(&self) -> bool {
        match self {
            Self::New { fs, mount, .. } => fs.is_some() || mount == "/",
            Self::Modify { format, mount, .. } => *format || mount == "/",
        }
    }
}

/// One line of the confirmation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionChange {
    pub device: String,
    pub create: bool,
    pub relabel: bool,
    pub format: bool,
    pub mount: String,
}

#[derive(Debug, Clone)]
struct Staged {
    device: String,
    op: PendingPartitionOp,
}

/// Keep only word characters and at most [`MAX_LABEL_LEN`] of them; anything
/// else clears the label.
pub fn sanitize_label(label: &str) -> String {
    let label: String = label.trim().chars().take(MAX_LABEL_LEN).collect();
    if !label.is_empty() && label.chars().all(|c| c.is_alphanumeric() || c == '_') {
        label
    } else {
        if !label.is_empty() {
            log::debug!("'{}' is not a valid label", label);
        }
        String::new()
    }
}

/// Staged per-partition choices of one manual partitioning session.
#[derive(Debug, Clone)]
pub struct StagingTable {
    firmware: FirmwareMode,
    entries: BTreeMap<PartitionId, Staged>,
}

impl StagingTable {
    pub fn new(firmware: FirmwareMode) -> Self {
        Self {
            firmware,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &PartitionId) -> Option<&PendingPartitionOp> {
        self.entries.get(id).map(|staged| &staged.op)
    }

    fn mount_staged(&self, mount: &str) -> bool {
        self.entries.values().any(|staged| staged.op.mount() == mount)
    }

    /// Apply the firmware rules to a requested mount/filesystem pair.
    ///
    /// Returns the possibly corrected pair plus a warning for the user.
    fn normalize(&self, mount: &str, fs: Option<FsKind>) -> (String, Option<FsKind>, Option<String>) {
        if fs == Some(FsKind::Swap) {
            return ("swap".to_string(), fs, None);
        }
        if self.firmware.is_uefi() && fs != Some(FsKind::Vfat) {
            if mount == "/boot/efi" {
                return (
                    mount.to_string(),
                    Some(FsKind::Vfat),
                    Some("/boot/efi needs to be fat32.".to_string()),
                );
            }
            if mount == "/boot" && !self.mount_staged("/boot/efi") {
                return (
                    mount.to_string(),
                    Some(FsKind::Vfat),
                    Some("As no /boot/efi is defined (yet), /boot needs to be fat32.".to_string()),
                );
            }
        }
        (mount.to_string(), fs, None)
    }

    /// Record a partition created in this session.
    pub fn stage_new(
        &mut self,
        id: PartitionId,
        device: impl Into<String>,
        label: &str,
        mount: &str,
        fs: Option<FsKind>,
    ) -> Option<String> {
        let (mount, fs, warning) = self.normalize(mount, fs);
        let op = PendingPartitionOp::New {
            label: sanitize_label(label),
            mount,
            format: fs.is_some(),
            fs,
        };
        self.entries.insert(
            id,
            Staged {
                device: device.into(),
                op,
            },
        );
        warning
    }

    /// Change the settings of a partition; a partition created in this
    /// session stays new.
    pub fn edit(
        &mut self,
        id: PartitionId,
        device: impl Into<String>,
        label: &str,
        mount: &str,
        fs: Option<FsKind>,
        format: bool,
    ) -> Option<String> {
        let (mount, fs, warning) = self.normalize(mount, fs);
        let label = sanitize_label(label);
        let was_new = self.get(&id).is_some_and(PendingPartitionOp::is_new);
        let op = if was_new {
            PendingPartitionOp::New {
                label,
                mount,
                fs,
                format,
            }
        } else {
            PendingPartitionOp::Modify {
                label,
                mount,
                fs,
                format,
            }
        };
        self.entries.insert(
            id,
            Staged {
                device: device.into(),
                op,
            },
        );
        warning
    }

    /// Forget a partition, e.g. after the user deleted it.
    pub fn remove(&mut self, id: &PartitionId) -> Option<PendingPartitionOp> {
        self.entries.remove(id).map(|staged| staged.op)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Confirmation list, in partition order.
    ///
    /// `original_labels` maps device paths to the labels found on disk.
    pub fn changes(&self, original_labels: &HashMap<String, String>) -> Vec<PartitionChange> {
        self.entries
            .values()
            .map(|staged| {
                let op = &staged.op;
                let relabel = match op {
                    PendingPartitionOp::New { label, .. } => !label.is_empty(),
                    PendingPartitionOp::Modify { label, .. } => original_labels
                        .get(&staged.device)
                        .is_some_and(|original| original != label),
                };
                PartitionChange {
                    device: staged.device.clone(),
                    create: op.is_new(),
                    relabel,
                    format: op.will_format(),
                    mount: op.mount().to_string(),
                }
            })
            .collect()
    }

    /// Format, swap and mount operations for the staged partitions.
    ///
    /// Formats come first, then mounts ordered from `/` downwards so every
    /// parent is mounted before its children.
    pub fn storage_ops(&self, dest_dir: &Path) -> Vec<StorageOp> {
        let mut ops = Vec::new();
        let mut mounts: Vec<(&str, &str, FsKind)> = Vec::new();

        for staged in self.entries.values() {
            let op = &staged.op;
            let Some(fs) = op.fs() else {
                continue;
            };
            if op.will_format() {
                ops.push(StorageOp::Format {
                    device: staged.device.clone(),
                    fs,
                    label: op.label().to_string(),
                });
            }
            if fs == FsKind::Swap {
                ops.push(StorageOp::SwapOn {
                    device: staged.device.clone(),
                });
            } else if op.mount().starts_with('/') {
                mounts.push((op.mount(), staged.device.as_str(), fs));
            }
        }

        mounts.sort_by_key(|(mount, _, _)| mount.trim_end_matches('/').matches('/').count());
        for (mount, device, fs) in mounts {
            ops.push(StorageOp::Mount {
                device: device.to_string(),
                mountpoint: join_target(dest_dir, mount),
                fs,
                options: fs.mount_options().to_string(),
            });
        }
        ops
    }
}
