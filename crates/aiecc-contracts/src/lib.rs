//! Shared, version-pinned identifiers.
//!
//! These constants are the single source of truth for schema/version strings and
//! well-known file names that appear in machine-readable I/O or on disk.

pub const AIECC_REPORT_SCHEMA_VERSION: &str = "aiecc.report@0.1.0";

/// Working directory used when the caller does not pick one.
pub const DEFAULT_WORK_DIR: &str = "acdc_project";

/// Runtime-support object linked into every tile by the cross-compiler backend.
pub const RUNTIME_SUPPORT_OBJECT_REL: &str = "runtime_lib/me_basic.o";

pub const ENV_TOOL_DIR: &str = "AIECC_TOOL_DIR";
pub const ENV_RUNTIME_LIB: &str = "AIECC_RUNTIME_LIB";

pub const ADDRESS_RESOLVED_FILE: &str = "input_with_addresses.mlir";
pub const FLOW_RESOLVED_FILE: &str = "input_physical.mlir";
pub const HOST_INTERFACE_FILE: &str = "aie_inc.cpp";

/// Target architecture used when detection is not requested.
pub const DEFAULT_TARGET_ARCH: &str = "aie";
