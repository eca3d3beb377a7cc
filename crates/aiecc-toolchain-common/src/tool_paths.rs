use std::path::{Path, PathBuf};

use aiecc_contracts::ENV_TOOL_DIR;

/// Where an external tool will be started from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolLocation {
    /// Inside the configured tool directory; the file may not exist.
    Pinned(PathBuf),
    /// Bare name, resolved by the OS through `PATH`.
    Search(String),
}

impl ToolLocation {
    pub fn program(&self) -> &std::ffi::OsStr {
        match self {
            ToolLocation::Pinned(p) => p.as_os_str(),
            ToolLocation::Search(name) => std::ffi::OsStr::new(name),
        }
    }
}

/// Tool directory from `AIECC_TOOL_DIR`, ignoring empty values.
pub fn tool_dir_from_env() -> Option<PathBuf> {
    let v = std::env::var_os(ENV_TOOL_DIR)?;
    if v.is_empty() {
        return None;
    }
    Some(PathBuf::from(v))
}

pub fn resolve_tool(tool_dir: Option<&Path>, name: &str) -> ToolLocation {
    match tool_dir {
        Some(dir) => {
            let file = format!("{name}{}", std::env::consts::EXE_SUFFIX);
            ToolLocation::Pinned(dir.join(file))
        }
        None => ToolLocation::Search(name.to_string()),
    }
}
