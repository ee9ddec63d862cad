//! reborn-planner - Main entry point
//!
//! Plans (and optionally runs) automatic disk partitioning, and turns package
//! requests into metalink download documents.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::thread;

use anyhow::{Context, Result, bail};
use log::{debug, error, info};
use nix::unistd::geteuid;
use serde::Serialize;

use reborn_planner::cli::{Cli, Commands, MetalinkArgs, PartitionArgs};
use reborn_planner::config_file::AutoPartitionConfig;
use reborn_planner::engine::autopart::AutoPartitionOutcome;
use reborn_planner::engine::layout::Layout;
use reborn_planner::engine::sizes::SizePlan;
use reborn_planner::error::PlannerError;
use reborn_planner::events::{EventKind, EventSink};
use reborn_planner::executor::{DryRunExecutor, ShellExecutor, ShellProbe};
use reborn_planner::hardware::HardwareInfo;
use reborn_planner::logic::queue::{DownloadQueueBuilder, QueueOptions, humanize_size};
use reborn_planner::logic::repo::{DatabaseSnapshot, PinPolicy};
use reborn_planner::logic::resolver::{DependencyResolver, ResolveOptions};
use reborn_planner::metalink::{get_info, to_metalink};
use reborn_planner::privilege::PrivilegeScope;
use reborn_planner::process_guard::{self, ProcessGuard};

const EVENT_CAPACITY: usize = 64;

/// Initialize the logger with appropriate settings
fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;

    Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env() // Allows RUST_LOG env var to override
        .init();
}

fn main() {
    init_logger();
    info!("reborn-planner starting up");

    // Child tools (parted, cryptsetup, mkfs) are terminated on SIGINT/SIGTERM
    if let Err(e) = process_guard::init_signal_handlers() {
        log::warn!("Failed to initialize signal handlers: {}", e);
    }
    let guard = ProcessGuard::new();

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    let result = match &cli.command {
        Commands::Partition(args) => run_partition(args, cli.dry_run),
        Commands::Validate { profile } => run_validate(profile),
        Commands::Metalink(args) => run_metalink(args),
        Commands::Inspect { file } => run_inspect(file),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("✗ {:#}", e);
        drop(guard);
        std::process::exit(1);
    }
}

/// Privileges can only be switched when running as root.
fn privilege_scope() -> Result<Option<PrivilegeScope>> {
    if !geteuid().is_root() {
        debug!("Not running as root; privilege switching disabled");
        return Ok(None);
    }
    Ok(Some(PrivilegeScope::from_env()?))
}

#[derive(Serialize)]
struct PlanView<'a> {
    sizes: &'a SizePlan,
    layout: &'a Layout,
}

fn run_partition(args: &PartitionArgs, dry_run: bool) -> Result<()> {
    let scope = privilege_scope()?;
    let user = scope.as_ref().map(|s| s.drop_privileges()).transpose()?;

    let config = args.to_config()?;
    let hardware = HardwareInfo::detect();
    config.validate(hardware.firmware)?;
    let job = config.to_auto_partition(&hardware)?;

    if let Some(path) = &args.save_profile {
        config.save_to_file(path)?;
        info!("Profile saved to {}", path.display());
    }

    if args.plan_only {
        let (sizes, layout) = job.plan()?;
        let view = PlanView {
            sizes: &sizes,
            layout: &layout,
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
        eprintln!("{}", job.storage_plan()?.summary());
        return Ok(());
    }

    let preview = job.storage_plan()?;
    debug!("{}", preview.summary());
    if !dry_run {
        if !geteuid().is_root() {
            bail!("Partitioning requires root; run with sudo or pass --dry-run");
        }
        if preview.is_destructive() {
            log::warn!("All data on {} will be erased", preview.disk);
        }
    }

    let (mut sink, rx) = EventSink::bounded(EVENT_CAPACITY);
    let printer = thread::spawn(move || {
        for event in rx {
            match event.kind {
                EventKind::Error => eprintln!("✗ {}", event.text),
                EventKind::Warning => eprintln!("! {}", event.text),
                EventKind::Percent => println!("[{}]", event.text),
                EventKind::Info => println!("{}", event.text),
            }
        }
    });

    let outcome = if dry_run {
        let mut executor = DryRunExecutor::new();
        job.run(&ShellProbe, &mut executor, &mut sink)
    } else {
        let _root = match (&scope, &user) {
            (Some(scope), Some(_)) => Some(scope.elevate()?),
            _ => None,
        };
        let mut executor = ShellExecutor::new(job.luks_password.clone());
        job.run(&ShellProbe, &mut executor, &mut sink)
    };

    if sink.dropped() > 0 {
        debug!("{} progress events dropped", sink.dropped());
    }
    drop(sink);
    if printer.join().is_err() {
        log::warn!("Event printer thread panicked");
    }

    report(&outcome?)
}

fn report(outcome: &AutoPartitionOutcome) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    if outcome.resized {
        info!("Volume group was smaller than planned; logical volumes were shrunk");
    }
    info!(
        "{} operations executed, {} warnings",
        outcome.executed,
        outcome.warnings.len()
    );
    Ok(())
}

fn run_validate(profile: &Path) -> Result<()> {
    info!("Validating profile: {:?}", profile);
    let config = AutoPartitionConfig::load_from_file(profile)?;
    let hardware = HardwareInfo::detect();
    config.validate(hardware.firmware)?;
    println!("✓ Profile is valid: {} ({})", config.device, hardware);
    Ok(())
}

#[cfg(feature = "alpm")]
fn alpm_snapshot(conf: &Path) -> Result<DatabaseSnapshot> {
    let manager = reborn_planner::package_manager::PackageManager::from_pacman_conf(conf)?;
    Ok(manager.snapshot())
}

#[cfg(not(feature = "alpm"))]
fn alpm_snapshot(conf: &Path) -> Result<DatabaseSnapshot> {
    Err(PlannerError::config(format!(
        "built without libalpm support, cannot read {}; pass --snapshot",
        conf.display()
    ))
    .into())
}

fn run_metalink(args: &MetalinkArgs) -> Result<()> {
    if args.names.is_empty() && !args.databases {
        bail!("Nothing to do: give package names or --databases");
    }
    let scope = privilege_scope()?;

    let db = match &args.snapshot {
        Some(path) => DatabaseSnapshot::load_from_file(path)?,
        None => alpm_snapshot(&args.conf)?,
    };

    let requested: BTreeSet<String> = args.names.iter().cloned().collect();
    let options = ResolveOptions {
        nodeps: args.nodeps,
        alldeps: args.all_deps,
        needed: args.needed,
    };
    let resolution = DependencyResolver::new(&db, &PinPolicy::default()).resolve(&requested, options);

    let queue_options = QueueOptions {
        download_databases: args.databases,
        sigs: args.sigs,
    };
    let queue = match DownloadQueueBuilder::new(&db).build(&resolution, queue_options) {
        Ok(queue) => queue,
        Err(PlannerError::Unresolved {
            not_found,
            missing_deps,
        }) => {
            for name in &not_found {
                eprintln!("✗ Can't find package or group: {}", name);
            }
            for dep in &missing_deps {
                eprintln!("✗ Can't resolve dependency: {}", dep);
            }
            bail!(
                "{} names and {} dependencies could not be resolved",
                not_found.len(),
                missing_deps.len()
            );
        }
        Err(e) => return Err(e.into()),
    };

    let xml = to_metalink(&queue)?;
    match &args.output {
        Some(path) => {
            let _user = scope.as_ref().map(|s| s.drop_privileges()).transpose()?;
            if path.exists() && !args.noconfirm {
                bail!("{} already exists; pass --noconfirm to overwrite", path.display());
            }
            fs::write(path, xml).with_context(|| format!("Failed to write {}", path.display()))?;
            info!(
                "Wrote {} packages ({}) to {}",
                queue.packages.len(),
                humanize_size(queue.download_size()),
                path.display()
            );
        }
        None => print!("{}", xml),
    }
    Ok(())
}

fn run_inspect(file: &Path) -> Result<()> {
    let xml = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let files = get_info(&xml)?;
    println!("{}", serde_json::to_string_pretty(&files)?);
    Ok(())
}
