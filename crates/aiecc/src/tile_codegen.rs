use std::ffi::OsString;
use std::path::{Path, PathBuf};

use aiecc_backends::{CROSS_COMPILER_TOOL, NATIVE_CODEGEN_TOOL, NATIVE_LINKER_TOOL};
use serde::Serialize;

use crate::backend::BackendPlan;
use crate::error::ToolError;
use crate::stages::{IR_OPT_TOOL, IR_TRANSLATE_TOOL};
use crate::tiles::{TileCoordinate, TileEntry};
use crate::tool::ToolInvoker;
use crate::work_area::{ArtifactKind, WorkArea};

pub const STRIP_TOOL: &str = "opt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TileStep {
    Lower,
    ControlFile,
    LinkerScript,
    LlvmIr,
    Strip,
    NativeCodegen,
    NativeLink,
    CrossCompile,
}

impl TileStep {
    pub fn as_str(self) -> &'static str {
        match self {
            TileStep::Lower => "lower",
            TileStep::ControlFile => "control-file",
            TileStep::LinkerScript => "linker-script",
            TileStep::LlvmIr => "llvm-ir",
            TileStep::Strip => "strip",
            TileStep::NativeCodegen => "native-codegen",
            TileStep::NativeLink => "native-link",
            TileStep::CrossCompile => "cross-compile",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStep {
    pub step: TileStep,
    pub tool: &'static str,
    pub args: Vec<OsString>,
    pub output: PathBuf,
}

fn os(p: &Path) -> OsString {
    p.as_os_str().to_os_string()
}

/// The full, ordered command list for one tile. Pure: nothing is run.
pub fn tile_steps(
    tile: TileCoordinate,
    address_resolved: &Path,
    work_area: &WorkArea,
    plan: &BackendPlan,
) -> Vec<ToolStep> {
    let path = |kind| work_area.path_for(tile, kind);
    let lowered = path(ArtifactKind::LoweredIr);
    let bcf = path(ArtifactKind::ControlFile);
    let ldscript = path(ArtifactKind::LinkerScript);
    let llvmir = path(ArtifactKind::LlvmIr);
    let stripped = path(ArtifactKind::StrippedIr);
    let object = path(ArtifactKind::Object);
    let elf = path(ArtifactKind::Executable);
    let tilecol = format!("--tilecol={}", tile.col);
    let tilerow = format!("--tilerow={}", tile.row);

    let mut steps = vec![
        ToolStep {
            step: TileStep::Lower,
            tool: IR_OPT_TOOL,
            args: vec![
                format!("--aie-llvm-lowering=tilecol={} tilerow={}", tile.col, tile.row).into(),
                os(address_resolved),
                "-o".into(),
                os(&lowered),
            ],
            output: lowered.clone(),
        },
        ToolStep {
            step: TileStep::ControlFile,
            tool: IR_TRANSLATE_TOOL,
            args: vec![
                os(address_resolved),
                "--aie-generate-bcf".into(),
                tilecol.clone().into(),
                tilerow.clone().into(),
                "-o".into(),
                os(&bcf),
            ],
            output: bcf.clone(),
        },
        ToolStep {
            step: TileStep::LinkerScript,
            tool: IR_TRANSLATE_TOOL,
            args: vec![
                os(address_resolved),
                "--aie-generate-ldscript".into(),
                tilecol.into(),
                tilerow.into(),
                "-o".into(),
                os(&ldscript),
            ],
            output: ldscript.clone(),
        },
        ToolStep {
            step: TileStep::LlvmIr,
            tool: IR_TRANSLATE_TOOL,
            args: vec![
                "--aie-generate-llvmir".into(),
                os(&lowered),
                "-o".into(),
                os(&llvmir),
            ],
            output: llvmir.clone(),
        },
        ToolStep {
            step: TileStep::Strip,
            tool: STRIP_TOOL,
            args: vec![
                "-strip".into(),
                "-S".into(),
                os(&llvmir),
                "-o".into(),
                os(&stripped),
            ],
            output: stripped.clone(),
        },
    ];

    match plan {
        BackendPlan::NativeAssembler { target_arch } => {
            steps.push(ToolStep {
                step: TileStep::NativeCodegen,
                tool: NATIVE_CODEGEN_TOOL,
                args: vec![
                    os(&stripped),
                    "-O2".into(),
                    format!("--march={target_arch}").into(),
                    "--filetype=obj".into(),
                    "-o".into(),
                    os(&object),
                ],
                output: object.clone(),
            });
            steps.push(ToolStep {
                step: TileStep::NativeLink,
                tool: NATIVE_LINKER_TOOL,
                args: vec![os(&object), "-c".into(), os(&bcf), "-o".into(), os(&elf)],
                output: elf,
            });
        }
        BackendPlan::CrossCompiler {
            target_arch,
            runtime_support,
        } => {
            let mut link_script = OsString::from("-Wl,-T,");
            link_script.push(ldscript.as_os_str());
            steps.push(ToolStep {
                step: TileStep::CrossCompile,
                tool: CROSS_COMPILER_TOOL,
                args: vec![
                    "-O2".into(),
                    format!("--target={target_arch}").into(),
                    os(&stripped),
                    os(runtime_support),
                    link_script,
                    "-o".into(),
                    os(&elf),
                ],
                output: elf,
            });
        }
    }

    steps
}

#[derive(Debug)]
pub enum TileStatus {
    Compiled { executable: PathBuf },
    Failed { step: TileStep, error: ToolError },
    /// Stopped by the cancel token mid-compilation; partial artifacts were removed.
    Cancelled,
    /// Never started because the run was already cancelled. Files from earlier runs
    /// are left alone.
    Skipped,
}

#[derive(Debug)]
pub struct TileOutcome {
    pub tile: TileCoordinate,
    pub prebuilt_elf: Option<String>,
    pub status: TileStatus,
}

impl TileOutcome {
    pub fn is_compiled(&self) -> bool {
        matches!(self.status, TileStatus::Compiled { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, TileStatus::Failed { .. })
    }

    pub(crate) fn cancelled(entry: &TileEntry, work_area: &WorkArea) -> Self {
        discard(work_area, entry.tile);
        TileOutcome {
            tile: entry.tile,
            prebuilt_elf: entry.elf_file.clone(),
            status: TileStatus::Cancelled,
        }
    }

    pub(crate) fn skipped(entry: &TileEntry) -> Self {
        TileOutcome {
            tile: entry.tile,
            prebuilt_elf: entry.elf_file.clone(),
            status: TileStatus::Skipped,
        }
    }
}

fn discard(work_area: &WorkArea, tile: TileCoordinate) {
    if let Err(err) = work_area.discard_tile_artifacts(tile) {
        log::warn!("tile {tile}: could not remove partial artifacts: {err}");
    }
}

/// Runs every step of one tile, stopping at the first failure.
pub fn compile_tile(
    invoker: &ToolInvoker,
    work_area: &WorkArea,
    address_resolved: &Path,
    plan: &BackendPlan,
    entry: &TileEntry,
) -> TileOutcome {
    let tile = entry.tile;
    log::info!("tile {tile}: compiling");

    for step in tile_steps(tile, address_resolved, work_area, plan) {
        if let Err(error) = invoker.invoke(step.tool, &step.args) {
            if error.is_cancelled() {
                log::info!("tile {tile}: cancelled during {}", step.step.as_str());
                return TileOutcome::cancelled(entry, work_area);
            }
            log::warn!("tile {tile}: {} failed: {error}", step.step.as_str());
            return TileOutcome {
                tile,
                prebuilt_elf: entry.elf_file.clone(),
                status: TileStatus::Failed {
                    step: step.step,
                    error,
                },
            };
        }
    }

    let executable = work_area.path_for(tile, ArtifactKind::Executable);
    log::info!("tile {tile}: wrote {}", executable.display());
    TileOutcome {
        tile,
        prebuilt_elf: entry.elf_file.clone(),
        status: TileStatus::Compiled { executable },
    }
}
