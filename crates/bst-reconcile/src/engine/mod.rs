use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::conf_store::{self, RootFlag};
use crate::config::Settings;
use crate::descriptor;
use crate::error::{Error, Result};
use crate::locator::Installation;
use crate::process::ProcessGuard;
use crate::progress::{LogSink, ProgressEvent, ProgressSink, StatusKind};

pub mod report;

pub use report::{
    Applied, BatchReport, BatchStatus, GlobalOutcome, ItemOutcome, Operation, TerminationSummary,
};

fn flag_value(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct Engine {
    settings: Settings,
    guard: ProcessGuard,
    sink: Arc<dyn ProgressSink>,
    busy: AtomicBool,
}

impl Engine {
    pub fn new(settings: Settings, guard: ProcessGuard, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            settings,
            guard,
            sink,
            busy: AtomicBool::new(false),
        }
    }

    /// Engine wired to the host process table, reporting progress through `tracing`.
    pub fn with_system_guard(settings: Settings) -> Self {
        let guard = ProcessGuard::system(&settings.process);
        Self::new(settings, guard, Arc::new(LogSink))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn guard(&self) -> &ProcessGuard {
        &self.guard
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn try_acquire(&self) -> Result<()> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::busy())
    }

    /// Periodic refresh entry point; `None` while a batch is in flight.
    pub fn refresh_if_idle(&self, installations: &[Installation]) -> Option<Catalog> {
        if self.is_busy() {
            debug!("batch in flight; skipping catalog refresh");
            return None;
        }
        Some(Catalog::refresh(installations, &self.settings))
    }

    pub fn toggle_root<S: AsRef<str>>(&self, catalog: &Catalog, ids: &[S]) -> Result<BatchReport> {
        self.run(Operation::ToggleRoot, catalog, ids)
    }

    pub fn toggle_rw<S: AsRef<str>>(&self, catalog: &Catalog, ids: &[S]) -> Result<BatchReport> {
        self.run(Operation::ToggleRw, catalog, ids)
    }

    /// Run one batch on the calling thread. Rejected with `Busy` if another is in flight.
    pub fn run<S: AsRef<str>>(
        &self,
        operation: Operation,
        catalog: &Catalog,
        ids: &[S],
    ) -> Result<BatchReport> {
        self.try_acquire()?;
        let _busy = BusyGuard { flag: &self.busy };
        self.execute(operation, catalog, ids)
    }

    /// Run one batch on a worker thread. The busy check happens before spawning, so a
    /// concurrent request is rejected immediately rather than queued.
    pub fn spawn_toggle(
        engine: &Arc<Self>,
        operation: Operation,
        catalog: Catalog,
        ids: Vec<String>,
    ) -> Result<JoinHandle<Result<BatchReport>>> {
        engine.try_acquire()?;
        let worker = Arc::clone(engine);
        let spawned = thread::Builder::new()
            .name("bst-reconcile-batch".into())
            .spawn(move || {
                let _busy = BusyGuard { flag: &worker.busy };
                worker.execute(operation, &catalog, ids.as_slice())
            });
        spawned.map_err(|e| {
            engine.busy.store(false, Ordering::Release);
            Error::from_io("failed to spawn batch worker", &e)
        })
    }

    fn execute<S: AsRef<str>>(
        &self,
        operation: Operation,
        catalog: &Catalog,
        ids: &[S],
    ) -> Result<BatchReport> {
        if ids.is_empty() {
            return Err(Error::invalid_state(format!(
                "no instances selected to {}",
                operation.label()
            )));
        }
        let started_at = Local::now();

        let mut order = HashMap::<String, usize>::new();
        let mut items = Vec::new();
        let mut targets = Vec::new();
        for raw in ids {
            let id = raw.as_ref().trim().to_string();
            if order.contains_key(&id) {
                continue;
            }
            order.insert(id.clone(), order.len());
            match catalog.get(&id) {
                Some(inst) if inst.is_displayable() => targets.push(id),
                Some(inst) => {
                    let err = Error::invalid_state(format!(
                        "status of '{id}' is indeterminate (root {}, r/w {})",
                        inst.individual_root.label(),
                        inst.rw_mode.label()
                    ));
                    items.push(self.failed(operation, id, err));
                }
                None => {
                    let err = Error::not_found(format!("unknown instance '{id}'"));
                    items.push(self.failed(operation, id, err));
                }
            }
        }

        self.sink.emit(ProgressEvent::BatchStarted {
            operation,
            items: targets.len(),
        });
        let termination = if targets.is_empty() {
            TerminationSummary::default()
        } else {
            self.stop_processes()
        };

        let mut next = catalog.clone();
        let global = match operation {
            Operation::ToggleRoot => self.apply_root(&mut next, &targets, &mut items),
            Operation::ToggleRw => {
                self.apply_rw(&mut next, &targets, &mut items);
                Vec::new()
            }
        };

        items.sort_by_key(|o| order.get(&o.unique_id).copied().unwrap_or(usize::MAX));
        let status = report::batch_status(&items, &global);
        self.sink.emit(ProgressEvent::BatchFinished { operation, status });
        info!(
            operation = operation.label(),
            status = status.label(),
            items = items.len(),
            "batch complete"
        );

        Ok(BatchReport {
            operation,
            started_at,
            items,
            global,
            termination,
            status,
            catalog: next,
        })
    }

    fn failed(&self, operation: Operation, unique_id: String, error: Error) -> ItemOutcome {
        warn!(id = %unique_id, operation = operation.label(), error = %error, "instance skipped");
        self.sink.emit(ProgressEvent::ItemFailed {
            unique_id: unique_id.clone(),
            operation,
            error: error.to_string(),
        });
        ItemOutcome {
            unique_id,
            operation,
            result: Err(error),
        }
    }

    fn stop_processes(&self) -> TerminationSummary {
        let report = self.guard.terminate_all();
        let summary = TerminationSummary::from(&report);
        self.sink.emit(ProgressEvent::ProcessesStopped {
            found: summary.found,
            failures: summary.failures.len().max(summary.survivors.len()),
        });
        if !report.all_stopped() {
            warn!(
                survivors = ?summary.survivors,
                "emulator processes still running; mutating anyway"
            );
        }
        if report.attempted() {
            let delay = self.settings.process.settle_delay();
            if !delay.is_zero() {
                debug!(delay_ms = delay.as_millis() as u64, "waiting for processes to settle");
                thread::sleep(delay);
            }
        }
        summary
    }

    // Root batches run in two phases per installation: selected instances' own flags
    // first, then the global flag as the union of every in-memory individual flag.
    fn apply_root(
        &self,
        next: &mut Catalog,
        targets: &[String],
        items: &mut Vec<ItemOutcome>,
    ) -> Vec<GlobalOutcome> {
        let keys = &self.settings.keys;
        let before = next.clone();

        let mut groups = BTreeMap::<PathBuf, Vec<String>>::new();
        for id in targets {
            if let Some(inst) = next.get(id) {
                groups
                    .entry(inst.config_path.clone())
                    .or_default()
                    .push(id.clone());
            }
        }

        let mut globals = Vec::new();
        for (config_path, ids) in groups {
            // Phase 1: individual flags, in memory as soon as they hit disk.
            for id in &ids {
                let Some(inst) = next.get(id) else {
                    continue;
                };
                let enable = !inst.effective_root().unwrap_or(false);
                let key = keys.instance_key(&inst.name);
                match conf_store::write_flag(&config_path, &key, flag_value(enable)) {
                    Ok(changed) => {
                        if let Some(inst) = next.get_mut(id) {
                            inst.individual_root = RootFlag::from_bool(enable);
                        }
                        items.push(ItemOutcome {
                            unique_id: id.clone(),
                            operation: Operation::ToggleRoot,
                            result: Ok(Applied {
                                value: on_off(enable).into(),
                                changed,
                            }),
                        });
                    }
                    Err(e) => {
                        let err = Error::new(
                            e.kind(),
                            format!("failed to set {key}: {}", e.message()),
                        );
                        items.push(self.failed(Operation::ToggleRoot, id.clone(), err));
                    }
                }
            }

            // Phase 2: the global flag is the union of every instance in this installation.
            let any_on = next
                .all()
                .any(|i| i.config_path == config_path && i.individual_root == RootFlag::On);
            let result = conf_store::write_flag(&config_path, &keys.global_root, flag_value(any_on));
            match &result {
                Ok(_) => {
                    for inst in next.instances_mut().filter(|i| i.config_path == config_path) {
                        inst.global_root = any_on;
                    }
                    self.sink.emit(ProgressEvent::GlobalUpdated {
                        config_path: config_path.clone(),
                        value: any_on,
                    });
                }
                Err(e) => {
                    error!(config = %config_path.display(), error = %e, "failed to update global root flag");
                }
            }
            globals.push(GlobalOutcome {
                config_path: config_path.clone(),
                result: result.map(|changed| Applied {
                    value: on_off(any_on).into(),
                    changed,
                }),
            });

            for inst in next.all().filter(|i| i.config_path == config_path) {
                let Some(now) = inst.effective_root() else {
                    continue;
                };
                let was = before.get(&inst.unique_id).and_then(|i| i.effective_root());
                if was != Some(now) || ids.contains(&inst.unique_id) {
                    self.sink.emit(ProgressEvent::ItemUpdated {
                        unique_id: inst.unique_id.clone(),
                        status: StatusKind::Root,
                        value: on_off(now).into(),
                    });
                }
            }
        }
        globals
    }

    fn apply_rw(&self, next: &mut Catalog, targets: &[String], items: &mut Vec<ItemOutcome>) {
        for id in targets {
            let Some(inst) = next.get(id) else {
                continue;
            };
            let Some(new_mode) = inst.rw_mode.toggled() else {
                let err = Error::invalid_state(format!("R/W mode of '{id}' is unknown"));
                items.push(self.failed(Operation::ToggleRw, id.clone(), err));
                continue;
            };
            let data_dir = inst.data_dir.clone();
            match descriptor::write_mode(&data_dir, &self.settings.descriptors, new_mode) {
                Ok(written) => {
                    if let Some(inst) = next.get_mut(id) {
                        inst.rw_mode = new_mode;
                    }
                    self.sink.emit(ProgressEvent::ItemUpdated {
                        unique_id: id.clone(),
                        status: StatusKind::Rw,
                        value: new_mode.label().into(),
                    });
                    self.refresh_master_siblings(next, id, &data_dir);
                    items.push(ItemOutcome {
                        unique_id: id.clone(),
                        operation: Operation::ToggleRw,
                        result: Ok(Applied {
                            value: new_mode.label().into(),
                            changed: written.lines_changed > 0,
                        }),
                    });
                }
                Err(e) => {
                    items.push(self.failed(Operation::ToggleRw, id.clone(), e));
                }
            }
        }
    }

    /// Re-read the mode of every other instance whose master descriptor was just rewritten.
    fn refresh_master_siblings(&self, next: &mut Catalog, written_id: &str, data_dir: &Path) {
        let settings = &self.settings.descriptors;
        let master = descriptor::master_path(data_dir, settings);
        for inst in next.instances_mut() {
            if inst.unique_id == written_id
                || descriptor::master_path(&inst.data_dir, settings) != master
            {
                continue;
            }
            let mode = descriptor::read_mode(&inst.data_dir, settings);
            if mode == inst.rw_mode {
                continue;
            }
            debug!(
                id = %inst.unique_id,
                from = inst.rw_mode.label(),
                to = mode.label(),
                "shared master descriptor changed sibling mode"
            );
            inst.rw_mode = mode;
            self.sink.emit(ProgressEvent::ItemUpdated {
                unique_id: inst.unique_id.clone(),
                status: StatusKind::Rw,
                value: mode.label().into(),
            });
        }
    }
}
