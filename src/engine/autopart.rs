//! Automatic partitioning run
//!
//! Drives one complete automatic installation layout on a disk:
//!
//! 1. compute sizes and the role/device layout
//! 2. tear down leftovers of earlier attempts (best-effort)
//! 3. wipe the disk, create the table and partitions
//! 4. set up LUKS containers
//! 5. create the LVM volume group, re-check its real size, create volumes
//! 6. format and mount, install keyfiles
//!
//! Any fatal executor error stops the run at once; nothing is rolled back.
//! The only built-in recovery is step 5: LVM metadata can make the volume
//! group smaller than planned, in which case sizes are recomputed once
//! against the disk minus the shortfall.

use std::path::PathBuf;

use serde::Serialize;

use crate::engine::layout::{Layout, LayoutPlanner, VOLUME_GROUP};
use crate::engine::reconcile::{SystemProbe, reconcile_ops};
use crate::engine::sizes::{SizeModel, SizePlan};
use crate::engine::storage::{
    StorageOp, StoragePlan, calculate_storage_plan, filesystem_ops, keyfile_ops, logical_volume_ops, luks_ops, partition_ops,
    prepare_disk_ops, volume_group_ops,
};
use crate::error::Result;
use crate::events::EventSink;
use crate::executor::PlanExecutor;
use crate::types::{DiskSpec, FeatureFlags};

/// Inputs of one automatic partitioning run.
#[derive(Debug, Clone)]
pub struct AutoPartition {
    pub disk: DiskSpec,
    pub flags: FeatureFlags,
    pub ram_mib: u64,
    pub dest_dir: PathBuf,
    /// Empty or missing means keyfiles are generated instead
    pub luks_password: Option<String>,
}

/// What a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct AutoPartitionOutcome {
    pub sizes: SizePlan,
    pub layout: Layout,
    /// True when the volume group came out smaller and sizes were recomputed
    pub resized: bool,
    pub executed: usize,
    /// Non-fatal failures, one line each
    pub warnings: Vec<String>,
}

impl AutoPartition {
    fn has_password(&self) -> bool {
        self.luks_password.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Size plan and layout without touching the system.
    pub fn plan(&self) -> Result<(SizePlan, Layout)> {
        let sizes = SizeModel::new(self.disk.table()).compute(self.disk.size_mib, self.ram_mib, &self.flags)?;
        sizes.log(self.flags.use_lvm);
        let layout = LayoutPlanner::layout(&self.disk, &sizes, &self.flags);
        Ok((sizes, layout))
    }

    /// Operations a run on a clean disk would issue, for previews.
    pub fn storage_plan(&self) -> Result<StoragePlan> {
        let (sizes, layout) = self.plan()?;
        Ok(calculate_storage_plan(
            &self.disk,
            &layout,
            &sizes,
            &self.flags,
            self.has_password(),
            &self.dest_dir,
        ))
    }

    /// Execute the whole run.
    ///
    /// The caller must hold exclusive access to the target disk.
    pub fn run(
        &self,
        probe: &dyn SystemProbe,
        executor: &mut dyn PlanExecutor,
        events: &mut EventSink,
    ) -> Result<AutoPartitionOutcome> {
        let (mut sizes, mut layout) = self.plan()?;
        let mut runner = Runner {
            executor,
            events,
            executed: 0,
            warnings: Vec::new(),
        };

        runner.events.info(format!("Preparing {}", self.disk.device));
        let teardown = reconcile_ops(probe, &self.disk.device, &self.dest_dir)?;
        runner.run_all(&teardown)?;
        runner.events.percent(0.1);

        runner.events.info("Creating partitions");
        runner.run_all(&prepare_disk_ops(&self.disk))?;
        runner.run_all(&partition_ops(&self.disk, &layout, &sizes, &self.flags))?;
        runner.events.percent(0.3);

        if self.flags.use_luks {
            runner.events.info("Setting up encryption");
            runner.run_all(&luks_ops(&layout, &self.flags, self.has_password()))?;
        }
        runner.events.percent(0.5);

        let mut resized = false;
        if self.flags.use_lvm {
            runner.events.info("Setting up LVM");
            runner.run_all(&volume_group_ops(&layout))?;

            if let Some(vg_size) = runner.executor.volume_group_size_mib(VOLUME_GROUP)? {
                if sizes.lvm_pv > vg_size {
                    log::debug!("Real {} volume group size: {} MiB", VOLUME_GROUP, vg_size);
                    log::debug!("Readjusting logical volume sizes");
                    let shortfall = sizes.lvm_pv - vg_size;
                    sizes = SizeModel::new(self.disk.table()).compute(
                        self.disk.size_mib.saturating_sub(shortfall),
                        self.ram_mib,
                        &self.flags,
                    )?;
                    sizes.log(true);
                    layout = LayoutPlanner::layout(&self.disk, &sizes, &self.flags);
                    resized = true;
                }
            }
            runner.run_all(&logical_volume_ops(&sizes))?;
        }
        runner.events.percent(0.7);

        runner.events.info("Creating filesystems");
        runner.run_all(&filesystem_ops(&layout, &self.dest_dir))?;
        runner.run_all(&keyfile_ops(&layout, self.has_password(), &self.dest_dir))?;
        runner.events.percent(1.0);

        Ok(AutoPartitionOutcome {
            sizes,
            layout,
            resized,
            executed: runner.executed,
            warnings: runner.warnings,
        })
    }
}

struct Runner<'a> {
    executor: &'a mut dyn PlanExecutor,
    events: &'a mut EventSink,
    executed: usize,
    warnings: Vec<String>,
}

impl Runner<'_> {
    fn run_all(&mut self, ops: &[StorageOp]) -> Result<()> {
        for op in ops {
            match self.executor.execute(op) {
                Ok(()) => self.executed += 1,
                Err(e) if !op.is_fatal() => {
                    log::warn!("{}", e);
                    self.events.warning(e.to_string());
                    self.warnings.push(e.to_string());
                }
                Err(e) => {
                    self.events.error(e.to_string());
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
