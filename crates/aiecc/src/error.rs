//! Error types for the tile-array compiler driver.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::tiles::TileCoordinate;

/// Failure of one external tool invocation.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("executable not found: {tool} (looked for {location})")]
    ExecutableNotFound { tool: String, location: String },

    #[error("{tool} failed with exit status {exit_code}: {command}\n{stderr_text}")]
    ToolFailed {
        tool: String,
        command: String,
        exit_code: i32,
        stderr: Vec<u8>,
        stderr_text: String,
    },

    #[error("{tool} timed out after {}ms: {command}", timeout.as_millis())]
    ToolTimedOut {
        tool: String,
        command: String,
        timeout: Duration,
    },

    #[error("{tool} was cancelled: {command}")]
    Cancelled { tool: String, command: String },

    #[error("spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn tool(&self) -> &str {
        match self {
            ToolError::ExecutableNotFound { tool, .. }
            | ToolError::ToolFailed { tool, .. }
            | ToolError::ToolTimedOut { tool, .. }
            | ToolError::Cancelled { tool, .. }
            | ToolError::Spawn { tool, .. } => tool,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ToolError::ExecutableNotFound { .. } => "AIECC_TOOL_NOT_FOUND",
            ToolError::ToolFailed { .. } => "AIECC_TOOL_FAILED",
            ToolError::ToolTimedOut { .. } => "AIECC_TOOL_TIMED_OUT",
            ToolError::Cancelled { .. } => "AIECC_CANCELLED",
            ToolError::Spawn { .. } => "AIECC_TOOL_SPAWN",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ToolError::Cancelled { .. })
    }
}

/// Run-level failure of the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{stage}: {source}")]
    Tool {
        stage: &'static str,
        #[source]
        source: ToolError,
    },

    #[error("malformed output from {tool}: {reason}")]
    MalformedToolOutput {
        tool: String,
        reason: String,
        output: String,
    },

    #[error("invalid backend {name:?} (expected native-assembler or cross-compiler)")]
    InvalidBackend { name: String },

    #[error("work area unusable: {}: {source}", path.display())]
    WorkArea {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("runtime-support object unavailable for the cross-compiler backend: {reason}")]
    RuntimeSupportNotFound { reason: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("{} of {total} tiles failed: {}", failed.len(), format_tiles(failed))]
    TilesFailed {
        failed: Vec<TileCoordinate>,
        total: usize,
    },
}

fn format_tiles(tiles: &[TileCoordinate]) -> String {
    tiles
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl PipelineError {
    pub fn tool(stage: &'static str, source: ToolError) -> Self {
        if source.is_cancelled() {
            return PipelineError::Cancelled;
        }
        PipelineError::Tool { stage, source }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Tool { source, .. } => source.code(),
            PipelineError::MalformedToolOutput { .. } => "AIECC_MALFORMED_TOOL_OUTPUT",
            PipelineError::InvalidBackend { .. } => "AIECC_INVALID_BACKEND",
            PipelineError::WorkArea { .. } => "AIECC_WORK_AREA",
            PipelineError::RuntimeSupportNotFound { .. } => "AIECC_RUNTIME_SUPPORT_NOT_FOUND",
            PipelineError::Cancelled => "AIECC_CANCELLED",
            PipelineError::TilesFailed { .. } => "AIECC_TILES_FAILED",
        }
    }

    pub fn tool_error(&self) -> Option<&ToolError> {
        match self {
            PipelineError::Tool { source, .. } => Some(source),
            _ => None,
        }
    }
}
