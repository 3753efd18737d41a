// SPDX-License-Identifier: GPL-3.0-only

mod config;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use rollback_sys::{
    CommandExecutor, DeleteScope, InFlightGuard, Invocation, SetRequest, SnapshotCoordinator,
    SystemExecutor, Transcript, VolumeGroupExpander, require_root,
};
use rollback_types::{ProfileTemplate, Role, SnapshotSize, Stamp};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Config;

const DEFAULT_FILTER: &str = "lvm_rollback=info,rollback_sys=info,warn";
const VERBOSE_FILTER: &str = "lvm_rollback=debug,rollback_sys=debug,warn";

#[derive(Debug, Parser)]
#[command(name = "lvm-rollback", version)]
#[command(about = "Snapshot LVM root volumes, boot into the snapshot, roll back or clean up")]
struct Cli {
    /// Configuration file (default: /etc/lvm-rollback.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Volume group to operate on
    #[arg(long, global = true)]
    vg: Option<String>,
    /// Print mutating commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,
    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Detect thin pool, free space and existing snapshots
    Detect,
    /// List snapshot volumes
    List,
    /// Dump `vgs` and `lvs`
    Status,
    /// Show the members and state of one snapshot set
    Show(StampArg),
    /// Create a snapshot set
    Create(CreateArgs),
    /// Add a boot entry for the set's root snapshot
    AddBootEntry(BootEntryArgs),
    /// Merge a snapshot set back into its origins
    Merge(StampArg),
    /// Remove rollback boot entries and snapshots
    Delete(StampArg),
    /// Grow the partition under a physical volume and resize it
    GrowPv {
        /// Physical volume (default: first PV of the volume group)
        #[arg(long)]
        pv: Option<String>,
    },
    /// Add a new physical volume from the largest free disk region
    AddPv {
        /// Disk to partition (default: disk of the first PV)
        #[arg(long)]
        disk: Option<String>,
    },
    /// Install boom and growpart through the package manager
    InstallTools,
}

#[derive(Debug, Args)]
struct StampArg {
    /// Snapshot set stamp (default: most recent set)
    #[arg(long)]
    stamp: Option<String>,
}

#[derive(Debug, Args)]
struct CreateArgs {
    /// Stamp for the new set (default: current local time)
    #[arg(long)]
    stamp: Option<String>,
    #[arg(long)]
    root_size: Option<String>,
    #[arg(long)]
    var_size: Option<String>,
    #[arg(long)]
    home_size: Option<String>,
    /// Create classic snapshots even when free space looks insufficient
    #[arg(long)]
    allow_insufficient: bool,
    /// Remove created snapshots again if a later one fails
    #[arg(long)]
    rollback_on_failure: bool,
}

#[derive(Debug, Args)]
struct BootEntryArgs {
    #[arg(long)]
    stamp: Option<String>,
    /// Kernel release to boot (default: running kernel)
    #[arg(long)]
    kernel: Option<String>,
    /// Extra kernel option, repeatable
    #[arg(long = "extra-opt")]
    extra: Vec<String>,
    /// Do not start from the running kernel command line
    #[arg(long)]
    no_current_cmdline: bool,
    /// Keep root= and rd.lvm.* options of the running kernel
    #[arg(long)]
    keep_conflicting: bool,
}

impl Command {
    fn mutates(&self) -> bool {
        !matches!(
            self,
            Command::Detect | Command::List | Command::Status | Command::Show(_)
        )
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn profile_template(exec: &dyn CommandExecutor) -> ProfileTemplate {
    let os_release = fs::read_to_string("/etc/os-release").unwrap_or_else(|error| {
        warn!("could not read /etc/os-release: {error}");
        String::new()
    });
    let kernel = match exec.execute(&Invocation::query("uname").arg("-r")) {
        Ok(output) if output.success() => output.stdout.trim().to_string(),
        _ => String::new(),
    };
    ProfileTemplate::from_os_release(&os_release, &kernel)
}

fn resolve_stamp(
    coordinator: &SnapshotCoordinator<'_>,
    vg: &str,
    stamp: Option<String>,
) -> Result<Stamp> {
    match stamp {
        Some(stamp) => Ok(Stamp::new(stamp)),
        None => {
            let latest = coordinator
                .latest_stamp(vg)?
                .with_context(|| format!("no snapshot sets found in {vg}; pass --stamp"))?;
            info!("using most recent set {latest}");
            Ok(latest)
        }
    }
}

fn print_report<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

fn print_transcript(transcript: &Transcript) {
    for entry in transcript.entries() {
        println!("{entry}");
    }
}

fn run(
    cli: Cli,
    config: Config,
    exec: &dyn CommandExecutor,
    transcript: &mut Transcript,
) -> Result<()> {
    let vg = cli.vg.clone().unwrap_or_else(|| config.volume_group.clone());
    let mut options = config.lifecycle_options(profile_template(exec));

    match cli.command {
        Command::Detect => {
            let coordinator = SnapshotCoordinator::new(exec, &options);
            let detection = coordinator.detect(&vg, transcript)?;
            print_report(cli.json, &detection, |detection| {
                println!("backend: {}", detection.backend.label());
                if let Some(info) = &detection.volume_group {
                    let size = info.size.map_or("?".to_string(), |size| format!("{size:.2}G"));
                    let free = info.free.map_or("?".to_string(), |free| format!("{free:.2}G"));
                    println!("{}: size {size}, free {free}", info.name);
                }
                for snapshot in &detection.snapshots {
                    println!("{} origin={}", snapshot.display_name(), snapshot.origin);
                }
            })
        }
        Command::List => {
            let coordinator = SnapshotCoordinator::new(exec, &options);
            let snapshots = coordinator.list_snapshots(&vg, transcript)?;
            print_report(cli.json, &snapshots, |snapshots| {
                if snapshots.is_empty() {
                    println!("(none found)");
                }
                for snapshot in snapshots {
                    let size = snapshot
                        .size
                        .map_or("?".to_string(), |size| format!("{size:.2}G"));
                    let usage = snapshot
                        .usage_percent
                        .map_or("-".to_string(), |usage| format!("{usage:.2}"));
                    println!(
                        "{:<28} origin={:<12} {:<8} size={size:<10} data%={usage}",
                        snapshot.display_name(),
                        snapshot.origin,
                        snapshot.backend.label()
                    );
                }
            })
        }
        Command::Status => {
            let coordinator = SnapshotCoordinator::new(exec, &options);
            print!("{}", coordinator.status()?);
            Ok(())
        }
        Command::Show(args) => {
            let coordinator = SnapshotCoordinator::new(exec, &options);
            let stamp = resolve_stamp(&coordinator, &vg, args.stamp)?;
            let view = coordinator.inspect_set(&vg, &stamp)?;
            print_report(cli.json, &view, |view| {
                println!("set {} in {}: {:?}", view.set.stamp, view.set.vg, view.state);
                for (role, name) in &view.set.members {
                    println!("  {role:<5} {name}");
                }
                for entry in &view.boot_entries {
                    println!("  boot entry {} \"{}\"", entry.id, entry.title);
                }
            })
        }
        Command::Create(args) => {
            options.allow_insufficient |= args.allow_insufficient;
            options.rollback_on_failure |= args.rollback_on_failure;
            let mut sizes = config.sizes();
            for (role, size) in [
                (Role::Root, args.root_size),
                (Role::Var, args.var_size),
                (Role::Home, args.home_size),
            ] {
                if let Some(size) = size {
                    sizes.insert(role, SnapshotSize::parse(&size));
                }
            }
            let request = SetRequest {
                vg,
                stamp: args.stamp.map(Stamp::new).unwrap_or_else(Stamp::now),
                sizes,
            };
            let set = SnapshotCoordinator::new(exec, &options).create_set(&request, transcript)?;
            if !set.is_empty() {
                transcript.note(format!(
                    "snapshot set {} created; add a boot entry with add-boot-entry --stamp {}",
                    set.stamp, set.stamp
                ));
            }
            Ok(())
        }
        Command::AddBootEntry(args) => {
            options.option_policy.extra.extend(args.extra);
            if args.no_current_cmdline {
                options.option_policy.use_current = false;
            }
            if args.keep_conflicting {
                options.option_policy.strip_conflicting = false;
            }
            let coordinator = SnapshotCoordinator::new(exec, &options);
            let stamp = resolve_stamp(&coordinator, &vg, args.stamp)?;
            coordinator.add_boot_entry(&vg, &stamp, args.kernel.as_deref(), transcript)?;
            Ok(())
        }
        Command::Merge(args) => {
            let coordinator = SnapshotCoordinator::new(exec, &options);
            let stamp = resolve_stamp(&coordinator, &vg, args.stamp)?;
            coordinator.merge(&vg, &stamp, transcript)?;
            Ok(())
        }
        Command::Delete(args) => {
            let scope = match args.stamp {
                Some(stamp) => DeleteScope::Stamp(Stamp::new(stamp)),
                None => DeleteScope::All,
            };
            SnapshotCoordinator::new(exec, &options).delete(&vg, &scope, transcript)?;
            if transcript.actions_taken() == 0 && transcript.failures() == 0 {
                transcript.note("nothing to delete");
            }
            Ok(())
        }
        Command::GrowPv { pv } => {
            VolumeGroupExpander::new(exec, options.package_manager, &options.growpart_package)
                .grow_existing_pv(&vg, pv.as_deref(), transcript)?;
            Ok(())
        }
        Command::AddPv { disk } => {
            let device =
                VolumeGroupExpander::new(exec, options.package_manager, &options.growpart_package)
                    .add_new_pv(&vg, disk.as_deref(), transcript)?;
            transcript.note(format!("{vg} extended with {device}"));
            Ok(())
        }
        Command::InstallTools => {
            SnapshotCoordinator::new(exec, &options).install_tools(transcript)?;
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;
    require_root()?;

    let _guard = if cli.command.mutates() {
        Some(InFlightGuard::acquire(&config.lock_path)?)
    } else {
        None
    };
    let exec = SystemExecutor::new(config.command_timeout(), cli.dry_run);

    let mut transcript = Transcript::new();
    let outcome = run(cli, config, &exec, &mut transcript);
    print_transcript(&transcript);
    outcome?;

    let failures = transcript.failures();
    if failures > 0 {
        bail!("{failures} step(s) failed");
    }
    Ok(())
}
