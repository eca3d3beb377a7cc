//! Machine-readable run report.

use std::path::Path;

use aiecc_contracts::AIECC_REPORT_SCHEMA_VERSION;
use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::driver::{PipelineState, RunOutcome};
use crate::error::{PipelineError, ToolError};
use crate::tile_codegen::{TileOutcome, TileStatus, TileStep};
use crate::tiles::TileCoordinate;

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub schema_version: &'static str,
    pub ok: bool,
    pub exit_code: u8,
    pub state: PipelineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<PipelineState>,
    pub states: Vec<PipelineState>,
    pub backend: &'static str,
    /// Tools run after the shared per-tile steps.
    pub backend_tools: &'static [&'static str],
    pub target_arch: Option<String>,
    pub trace_size: Option<u64>,
    pub work_dir: Option<String>,
    pub runtime_support: Option<String>,
    pub address_resolved: Option<ArtifactReport>,
    pub flow_resolved: Option<ArtifactReport>,
    pub host_interface: Option<ArtifactReport>,
    pub tiles: Vec<TileReport>,
    pub error: Option<ErrorReport>,
}

#[derive(Debug, Serialize)]
pub struct ArtifactReport {
    pub path: String,
    /// Absent when the file could not be read back.
    pub sha256: Option<String>,
    pub bytes: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct TileReport {
    pub col: u32,
    pub row: u32,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prebuilt_elf: Option<String>,
    pub executable: Option<ArtifactReport>,
    pub error: Option<ErrorReport>,
}

#[derive(Debug, Default, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<TileStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_b64: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tiles: Vec<TileCoordinate>,
}

impl ErrorReport {
    pub fn from_tool_error(err: &ToolError) -> Self {
        let mut out = ErrorReport {
            code: err.code(),
            message: err.to_string(),
            tool: Some(err.tool().to_string()),
            ..Default::default()
        };
        match err {
            ToolError::ToolFailed {
                command,
                exit_code,
                stderr,
                ..
            } => {
                out.command = Some(command.clone());
                out.exit_code = Some(*exit_code);
                out.stderr_b64 = Some(base64::engine::general_purpose::STANDARD.encode(stderr));
            }
            ToolError::ToolTimedOut {
                command, timeout, ..
            } => {
                out.command = Some(command.clone());
                out.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
            }
            ToolError::Cancelled { command, .. } => out.command = Some(command.clone()),
            ToolError::ExecutableNotFound { .. } | ToolError::Spawn { .. } => {}
        }
        out
    }

    pub fn from_pipeline_error(err: &PipelineError) -> Self {
        match err {
            PipelineError::Tool { stage, source } => {
                let mut out = Self::from_tool_error(source);
                out.message = err.to_string();
                out.stage = Some(*stage);
                out
            }
            PipelineError::MalformedToolOutput { tool, .. } => ErrorReport {
                code: err.code(),
                message: err.to_string(),
                tool: Some(tool.clone()),
                ..Default::default()
            },
            PipelineError::TilesFailed { failed, .. } => ErrorReport {
                code: err.code(),
                message: err.to_string(),
                tiles: failed.clone(),
                ..Default::default()
            },
            _ => ErrorReport {
                code: err.code(),
                message: err.to_string(),
                ..Default::default()
            },
        }
    }
}

impl RunReport {
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let flow_resolved = outcome
            .host_interface
            .as_ref()
            .map(|h| artifact(&h.flow_resolved));
        let host_interface = outcome
            .host_interface
            .as_ref()
            .map(|h| artifact(&h.source));
        RunReport {
            schema_version: AIECC_REPORT_SCHEMA_VERSION,
            ok: outcome.ok(),
            exit_code: outcome.exit_code(),
            state: outcome.state(),
            failed_in: outcome.failed_in(),
            states: outcome.states.clone(),
            backend: outcome.backend.as_str(),
            backend_tools: outcome.backend.final_tools(),
            target_arch: outcome.target_arch.clone(),
            trace_size: outcome.trace_size,
            work_dir: outcome
                .work_area
                .as_ref()
                .map(|w| w.root().display().to_string()),
            runtime_support: outcome
                .runtime_support
                .as_ref()
                .map(|p| p.display().to_string()),
            address_resolved: outcome.address_resolved.as_deref().map(artifact),
            flow_resolved,
            host_interface,
            tiles: outcome.tiles.iter().map(tile_report).collect(),
            error: outcome.error.as_ref().map(ErrorReport::from_pipeline_error),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn tile_report(t: &TileOutcome) -> TileReport {
    let (status, executable, error) = match &t.status {
        TileStatus::Compiled { executable } => ("compiled", Some(artifact(executable)), None),
        TileStatus::Failed { step, error } => {
            let mut e = ErrorReport::from_tool_error(error);
            e.step = Some(*step);
            ("failed", None, Some(e))
        }
        TileStatus::Cancelled => ("cancelled", None, None),
        TileStatus::Skipped => ("skipped", None, None),
    };
    TileReport {
        col: t.tile.col,
        row: t.tile.row,
        status,
        prebuilt_elf: t.prebuilt_elf.clone(),
        executable,
        error,
    }
}

fn artifact(path: &Path) -> ArtifactReport {
    let bytes = std::fs::read(path).ok();
    ArtifactReport {
        path: path.display().to_string(),
        sha256: bytes.as_deref().map(sha256_hex),
        bytes: bytes.map(|b| b.len() as u64),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_lower(&hasher.finalize())
}

fn hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}
