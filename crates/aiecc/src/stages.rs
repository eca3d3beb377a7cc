//! Array-scope stages: each runs once per compilation and reads or writes whole-array
//! modules only.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::backend::normalize_target_arch;
use crate::error::PipelineError;
use crate::tool::ToolInvoker;
use crate::work_area::{ArrayArtifact, WorkArea};

pub const IR_OPT_TOOL: &str = "aie-opt";
pub const IR_TRANSLATE_TOOL: &str = "aie-translate";

/// Assigns buffer addresses and normalizes control flow over the whole array.
pub fn resolve_addresses(
    invoker: &ToolInvoker,
    work_area: &WorkArea,
    input: &Path,
) -> Result<PathBuf, PipelineError> {
    let out = work_area.array_path(ArrayArtifact::AddressResolved);
    let args: Vec<OsString> = vec![
        "--aie-assign-buffer-addresses".into(),
        "-convert-scf-to-std".into(),
        input.as_os_str().to_os_string(),
        "-o".into(),
        out.as_os_str().to_os_string(),
    ];
    invoker
        .invoke(IR_OPT_TOOL, &args)
        .map_err(|e| PipelineError::tool("address resolution", e))?;
    Ok(out)
}

pub fn detect_target_arch(
    invoker: &ToolInvoker,
    address_resolved: &Path,
) -> Result<String, PipelineError> {
    let args: Vec<OsString> = vec![
        "--aie-generate-target-arch".into(),
        address_resolved.as_os_str().to_os_string(),
    ];
    let out = invoker
        .invoke(IR_TRANSLATE_TOOL, &args)
        .map_err(|e| PipelineError::tool("target architecture", e))?;
    let text = out.stdout_text();
    normalize_target_arch(&text).map_err(|reason| PipelineError::MalformedToolOutput {
        tool: IR_TRANSLATE_TOOL.to_string(),
        reason,
        output: text.clone(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInterface {
    pub flow_resolved: PathBuf,
    pub source: PathBuf,
}

/// Synthesizes the switchbox flows, then emits the host-side configuration source.
pub fn generate_host_interface(
    invoker: &ToolInvoker,
    work_area: &WorkArea,
    address_resolved: &Path,
) -> Result<HostInterface, PipelineError> {
    let flow_resolved = work_area.array_path(ArrayArtifact::FlowResolved);
    let args: Vec<OsString> = vec![
        "--aie-create-flows".into(),
        address_resolved.as_os_str().to_os_string(),
        "-o".into(),
        flow_resolved.as_os_str().to_os_string(),
    ];
    invoker
        .invoke(IR_OPT_TOOL, &args)
        .map_err(|e| PipelineError::tool("flow synthesis", e))?;

    let source = work_area.array_path(ArrayArtifact::HostInterface);
    let args: Vec<OsString> = vec![
        "--aie-generate-xaie".into(),
        flow_resolved.as_os_str().to_os_string(),
        "-o".into(),
        source.as_os_str().to_os_string(),
    ];
    invoker
        .invoke(IR_TRANSLATE_TOOL, &args)
        .map_err(|e| PipelineError::tool("host interface", e))?;

    Ok(HostInterface {
        flow_resolved,
        source,
    })
}
