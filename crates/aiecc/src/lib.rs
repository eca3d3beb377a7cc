//! Compilation driver for tile-array accelerator programs.
//!
//! One address-resolved module fans out into an executable per tile plus a host
//! interface source, by threading tile coordinates through a chain of external tools.

pub mod backend;
pub mod driver;
pub mod error;
pub mod report;
pub mod stages;
pub mod tile_codegen;
pub mod tiles;
pub mod tool;
pub mod work_area;

pub use aiecc_backends::BackendId;
pub use backend::{select_backend, BackendPlan, TargetArchSelection};
pub use driver::{
    run_pipeline, DriverConfig, PipelineDriver, PipelineState, RunOutcome, TileFailurePolicy,
};
pub use error::{PipelineError, ToolError};
pub use report::RunReport;
pub use tile_codegen::{TileOutcome, TileStatus, TileStep};
pub use tiles::{parse_core_list, TileCoordinate, TileEntry};
pub use tool::{CancelToken, ToolInvoker};
pub use work_area::{ArtifactKind, ArrayArtifact, WorkArea};
