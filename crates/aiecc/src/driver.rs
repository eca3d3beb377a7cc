//! Sequencing of the whole compilation run.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use aiecc_backends::BackendId;
use aiecc_contracts::DEFAULT_WORK_DIR;
use aiecc_toolchain_common::runtime_paths::resolve_runtime_support_object;
use serde::Serialize;

use crate::backend::{BackendPlan, TargetArchSelection};
use crate::error::PipelineError;
use crate::stages::{self, HostInterface};
use crate::tile_codegen::{compile_tile, TileOutcome};
use crate::tiles::{enumerate_tiles, TileCoordinate, TileEntry};
use crate::tool::{CancelToken, ToolInvoker};
use crate::work_area::WorkArea;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Initializing,
    AddressResolving,
    EnumeratingTiles,
    CompilingTiles,
    GeneratingHostInterface,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Initializing => "initializing",
            PipelineState::AddressResolving => "address_resolving",
            PipelineState::EnumeratingTiles => "enumerating_tiles",
            PipelineState::CompilingTiles => "compiling_tiles",
            PipelineState::GeneratingHostInterface => "generating_host_interface",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }
}

/// What a failed tile does to the overall run status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TileFailurePolicy {
    /// Any failed tile fails the run; the host interface is still generated.
    #[default]
    FailRun,
    /// Failed tiles are reported but the run completes.
    Tolerate,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub input: PathBuf,
    pub work_dir: PathBuf,
    pub backend: BackendId,
    pub target_arch: TargetArchSelection,
    /// Explicit runtime-support object; otherwise it is searched for.
    pub runtime_support: Option<PathBuf>,
    pub tool_dir: Option<PathBuf>,
    pub tool_timeout: Option<Duration>,
    pub jobs: usize,
    pub trace_size: Option<u64>,
    pub fail_fast: bool,
    pub tile_failure_policy: TileFailurePolicy,
}

impl DriverConfig {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            backend: BackendId::default(),
            target_arch: TargetArchSelection::default(),
            runtime_support: None,
            tool_dir: None,
            tool_timeout: None,
            jobs: default_jobs(),
            trace_size: None,
            fail_fast: false,
            tile_failure_policy: TileFailurePolicy::default(),
        }
    }
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Everything a run produced, successful or not.
#[derive(Debug)]
pub struct RunOutcome {
    pub backend: BackendId,
    pub trace_size: Option<u64>,
    pub states: Vec<PipelineState>,
    pub work_area: Option<WorkArea>,
    pub address_resolved: Option<PathBuf>,
    pub target_arch: Option<String>,
    pub runtime_support: Option<PathBuf>,
    pub tiles: Vec<TileOutcome>,
    pub host_interface: Option<HostInterface>,
    pub error: Option<PipelineError>,
}

impl RunOutcome {
    fn new(config: &DriverConfig) -> Self {
        Self {
            backend: config.backend,
            trace_size: config.trace_size,
            states: vec![PipelineState::Initializing],
            work_area: None,
            address_resolved: None,
            target_arch: None,
            runtime_support: None,
            tiles: Vec::new(),
            host_interface: None,
            error: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.states
            .last()
            .copied()
            .unwrap_or(PipelineState::Initializing)
    }

    pub fn ok(&self) -> bool {
        self.state() == PipelineState::Completed
    }

    /// The state the run was in when it failed.
    pub fn failed_in(&self) -> Option<PipelineState> {
        if self.ok() {
            return None;
        }
        self.states
            .iter()
            .rev()
            .copied()
            .find(|s| !s.is_terminal())
    }

    pub fn failed_tiles(&self) -> Vec<TileCoordinate> {
        self.tiles
            .iter()
            .filter(|t| t.is_failed())
            .map(|t| t.tile)
            .collect()
    }

    pub fn exit_code(&self) -> u8 {
        if self.ok() {
            0
        } else {
            1
        }
    }
}

pub struct PipelineDriver<'a> {
    config: &'a DriverConfig,
    invoker: ToolInvoker,
}

impl<'a> PipelineDriver<'a> {
    pub fn new(config: &'a DriverConfig, cancel: CancelToken) -> Self {
        let invoker = ToolInvoker::new(config.tool_dir.clone(), config.tool_timeout, cancel);
        Self { config, invoker }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.invoker.cancel_token()
    }

    pub fn run(&self) -> RunOutcome {
        let mut out = RunOutcome::new(self.config);
        log::info!(
            "compiling {} with backend {}",
            self.config.input.display(),
            self.config.backend
        );
        if let Some(trace_size) = self.config.trace_size {
            log::info!("trace buffer size: {trace_size} bytes");
        }

        match self.drive(&mut out) {
            Ok(()) => enter(&mut out, PipelineState::Completed),
            Err(err) => {
                log::warn!("run failed: {err}");
                out.error = Some(err);
                enter(&mut out, PipelineState::Failed);
            }
        }
        out
    }

    fn drive(&self, out: &mut RunOutcome) -> Result<(), PipelineError> {
        let config = self.config;
        let work_area = WorkArea::ensure(&config.work_dir)?;
        out.work_area = Some(work_area.clone());

        let runtime_support = if config.backend.needs_runtime_support() {
            let path = resolve_runtime_support_object(config.runtime_support.as_deref())
                .map_err(|e| PipelineError::RuntimeSupportNotFound {
                    reason: format!("{e:#}"),
                })?;
            out.runtime_support = Some(path.clone());
            Some(path)
        } else {
            None
        };
        if self.cancel_token().is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        enter(out, PipelineState::AddressResolving);
        let address_resolved = stages::resolve_addresses(&self.invoker, &work_area, &config.input)?;
        out.address_resolved = Some(address_resolved.clone());

        let target_arch = match &config.target_arch {
            TargetArchSelection::Fixed(arch) => arch.clone(),
            TargetArchSelection::Detect => {
                let arch = stages::detect_target_arch(&self.invoker, &address_resolved)?;
                log::info!("detected target architecture: {arch}");
                arch
            }
        };
        out.target_arch = Some(target_arch.clone());
        let plan = BackendPlan::resolve(config.backend, &target_arch, || {
            runtime_support.ok_or_else(|| "runtime-support object was not resolved".to_string())
        })?;

        enter(out, PipelineState::EnumeratingTiles);
        let entries = enumerate_tiles(&self.invoker, &address_resolved)?;
        log::info!("{} tile(s) to compile", entries.len());

        enter(out, PipelineState::CompilingTiles);
        out.tiles = self.compile_tiles(&work_area, &address_resolved, &plan, &entries);
        let failed = out.failed_tiles();
        if self.cancel_token().is_cancelled() {
            if config.fail_fast && !failed.is_empty() {
                return Err(PipelineError::TilesFailed {
                    failed,
                    total: entries.len(),
                });
            }
            return Err(PipelineError::Cancelled);
        }

        enter(out, PipelineState::GeneratingHostInterface);
        let host_interface =
            stages::generate_host_interface(&self.invoker, &work_area, &address_resolved)?;
        log::info!("wrote {}", host_interface.source.display());
        out.host_interface = Some(host_interface);

        if !failed.is_empty() {
            match config.tile_failure_policy {
                TileFailurePolicy::FailRun => {
                    return Err(PipelineError::TilesFailed {
                        failed,
                        total: entries.len(),
                    })
                }
                TileFailurePolicy::Tolerate => {
                    log::warn!("{} tile(s) failed; continuing", failed.len());
                }
            }
        }
        Ok(())
    }

    /// Fans the tiles out over the worker pool. Outcomes come back in enumeration order.
    fn compile_tiles(
        &self,
        work_area: &WorkArea,
        address_resolved: &Path,
        plan: &BackendPlan,
        entries: &[TileEntry],
    ) -> Vec<TileOutcome> {
        let cancel = self.cancel_token();
        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<(usize, TileOutcome)>> = Mutex::new(Vec::with_capacity(entries.len()));

        std::thread::scope(|scope| {
            let jobs = self.config.jobs.max(1).min(entries.len().max(1));
            for _ in 0..jobs {
                scope.spawn(|| loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    if idx >= entries.len() {
                        return;
                    }
                    let entry = &entries[idx];
                    let outcome = if cancel.is_cancelled() {
                        TileOutcome::skipped(entry)
                    } else {
                        compile_tile(&self.invoker, work_area, address_resolved, plan, entry)
                    };
                    if outcome.is_failed() && self.config.fail_fast {
                        log::warn!("tile {} failed; cancelling remaining tiles", entry.tile);
                        cancel.cancel();
                    }
                    if let Ok(mut guard) = results.lock() {
                        guard.push((idx, outcome));
                    }
                });
            }
        });

        let mut out = results.into_inner().unwrap_or_else(|e| e.into_inner());
        out.sort_by_key(|(idx, _)| *idx);
        out.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

fn enter(out: &mut RunOutcome, state: PipelineState) {
    log::info!("state: {}", state.as_str());
    out.states.push(state);
}

pub fn run_pipeline(config: &DriverConfig, cancel: CancelToken) -> RunOutcome {
    PipelineDriver::new(config, cancel).run()
}
