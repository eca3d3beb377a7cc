use std::path::{Path, PathBuf};

use aiecc_contracts::{ENV_RUNTIME_LIB, RUNTIME_SUPPORT_OBJECT_REL};
use anyhow::Result;

/// Locates the runtime-support object linked into every tile by the cross-compiler
/// backend.
///
/// Lookup order: `explicit`, then `AIECC_RUNTIME_LIB`, then the search performed by
/// [`default_runtime_support_object_from_exe`].
pub fn resolve_runtime_support_object(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("runtime-support object not found: {}", path.display());
    }

    if let Some(env_path) = std::env::var_os(ENV_RUNTIME_LIB) {
        let path = PathBuf::from(env_path);
        if path.is_file() {
            return Ok(path);
        }
        anyhow::bail!(
            "runtime-support object not found: {} (from {ENV_RUNTIME_LIB})",
            path.display()
        );
    }

    default_runtime_support_object_from_exe(std::env::current_exe().ok().as_deref())
}

pub fn default_runtime_support_object_from_exe(exe: Option<&Path>) -> Result<PathBuf> {
    let mut checked: Vec<PathBuf> = Vec::new();

    let rel = PathBuf::from(RUNTIME_SUPPORT_OBJECT_REL);
    checked.push(rel.clone());
    if rel.is_file() {
        return Ok(rel);
    }

    if let Some(exe) = exe {
        if let Some(exe_dir) = exe.parent() {
            // Installed layouts put runtime_lib/ next to bin/ or a few levels up from
            // a build tree.
            let mut base = Some(exe_dir);
            for _ in 0..4 {
                let Some(dir) = base else { break };
                let cand = dir.join(RUNTIME_SUPPORT_OBJECT_REL);
                checked.push(cand.clone());
                if cand.is_file() {
                    return Ok(cand);
                }
                base = dir.parent();
            }
        }
    }

    let crate_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    if let Some(workspace_root) = crate_dir.parent().and_then(|p| p.parent()) {
        let abs = workspace_root.join(RUNTIME_SUPPORT_OBJECT_REL);
        checked.push(abs.clone());
        if abs.is_file() {
            return Ok(abs);
        }
    }

    let checked = checked
        .into_iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "could not locate the runtime-support object (expected {RUNTIME_SUPPORT_OBJECT_REL})\n\nlooked for:\n{checked}\n\nfix:\n  - pass --runtime-lib <path>, or\n  - set {ENV_RUNTIME_LIB}, or\n  - use --backend native-assembler"
    );
}
