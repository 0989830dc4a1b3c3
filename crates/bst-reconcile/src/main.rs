use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use bst_reconcile::engine::{BatchReport, BatchStatus, Engine, Operation};
use bst_reconcile::process::ProcessGuard;
use bst_reconcile::{Catalog, Error, Result, Settings};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Settings TOML (defaults apply when omitted)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Registry snapshot TOML; overrides `locator.registry_file`
    #[arg(long, global = true)]
    registry: Option<PathBuf>,
    /// Raise log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List discovered installations
    Discover,
    /// Show instances with their effective root status and R/W mode
    List {
        /// Include instances whose status could not be determined
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Flip the effective root status of the given instances
    ToggleRoot {
        /// Unique ids (`Name (source)`) or unambiguous instance names
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Flip the disk mode of the given instances
    ToggleRw {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// List running emulator processes
    Processes,
    /// Stop every running emulator process
    Stop,
}

fn main() -> Result<()> {
    let args = Args::parse();
    bst_reconcile::logging::init(args.verbose, args.log_json);

    let mut settings = match &args.settings {
        Some(path) => bst_reconcile::config::load(path)?,
        None => Settings::default(),
    };
    if let Some(registry) = args.registry {
        settings.locator.registry_file = Some(registry);
    }

    match args.cmd {
        Command::Discover => cmd_discover(&settings),
        Command::List { all, json } => cmd_list(&settings, all, json),
        Command::ToggleRoot { ids, json } => cmd_toggle(settings, Operation::ToggleRoot, &ids, json),
        Command::ToggleRw { ids, json } => cmd_toggle(settings, Operation::ToggleRw, &ids, json),
        Command::Processes => cmd_processes(&settings),
        Command::Stop => cmd_stop(&settings),
    }
}

fn load_catalog(settings: &Settings) -> Catalog {
    let installations = bst_reconcile::discover_installations(settings);
    bst_reconcile::refresh_catalog(&installations, settings)
}

fn cmd_discover(settings: &Settings) -> Result<()> {
    let installations = bst_reconcile::discover_installations(settings);
    if installations.is_empty() {
        println!("no installations found");
        return Ok(());
    }
    for inst in &installations {
        println!(
            "{:<8} config={}  data={}",
            inst.source_id,
            inst.config_path.display(),
            inst.data_path.display()
        );
    }
    Ok(())
}

fn cmd_list(settings: &Settings, all: bool, json: bool) -> Result<()> {
    let catalog = load_catalog(settings);
    let shown: Vec<_> = if all {
        catalog.all().collect()
    } else {
        catalog.displayable().collect()
    };

    if json {
        let s = serde_json::to_string_pretty(&shown)
            .map_err(|e| Error::msg(format!("failed to encode instances: {e}")))?;
        println!("{s}");
        return Ok(());
    }
    if shown.is_empty() {
        println!("no instances found");
        return Ok(());
    }
    for inst in shown {
        let root = match inst.effective_root() {
            Some(true) => "on",
            Some(false) => "off",
            None => "unknown",
        };
        println!("{:<32} root={:<8} rw={}", inst.unique_id, root, inst.rw_mode.label());
    }
    Ok(())
}

fn cmd_toggle(settings: Settings, op: Operation, raw_ids: &[String], json: bool) -> Result<()> {
    let catalog = load_catalog(&settings);
    let mut ids = Vec::with_capacity(raw_ids.len());
    for raw in raw_ids {
        match catalog.resolve(raw) {
            Ok(id) => ids.push(id),
            // Left for the engine to report per item.
            Err(e) if e.is_not_found() => ids.push(raw.trim().to_string()),
            Err(e) => return Err(e),
        }
    }

    let engine = Engine::with_system_guard(settings);
    let report = engine.run(op, &catalog, ids.as_slice())?;
    print_report(&report, json)?;
    match report.status {
        BatchStatus::Succeeded => Ok(()),
        status => Err(Error::msg(format!(
            "{} finished with status {}",
            op.label(),
            status.label()
        ))),
    }
}

fn print_report(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        let s = serde_json::to_string_pretty(&report.to_json())
            .map_err(|e| Error::msg(format!("failed to encode report: {e}")))?;
        println!("{s}");
        return Ok(());
    }
    if report.termination.found > 0 {
        println!(
            "stopped {} emulator process(es): {} exited, {} killed, {} still running",
            report.termination.found,
            report.termination.exited,
            report.termination.killed,
            report.termination.survivors.len()
        );
    }
    for item in &report.items {
        println!("{item}");
    }
    for g in &report.global {
        match &g.result {
            Ok(a) => println!("global root flag {}: {}", g.config_path.display(), a.value),
            Err(e) => println!("global root flag {} not updated: {e}", g.config_path.display()),
        }
    }
    Ok(())
}

fn cmd_processes(settings: &Settings) -> Result<()> {
    let guard = ProcessGuard::system(&settings.process);
    let running = guard.running();
    if running.is_empty() {
        println!("no emulator processes running");
    }
    for p in running {
        println!("{:>7}  {}", p.pid, p.name);
    }
    Ok(())
}

fn cmd_stop(settings: &Settings) -> Result<()> {
    let guard = ProcessGuard::system(&settings.process);
    let report = guard.terminate_all();
    if !report.attempted() {
        println!("no emulator processes running");
        return Ok(());
    }
    println!(
        "found {}: {} exited, {} killed",
        report.found.len(),
        report.exited.len(),
        report.killed.len()
    );
    for (p, e) in &report.failures {
        println!("  {} ({}): {e}", p.name, p.pid);
    }
    if report.all_stopped() {
        Ok(())
    } else {
        Err(Error::msg(format!(
            "{} emulator process(es) still running",
            report.survivors.len()
        )))
    }
}
