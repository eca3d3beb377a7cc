use std::path::{Path, PathBuf};

use aiecc_backends::BackendId;
use aiecc_contracts::DEFAULT_TARGET_ARCH;

use crate::error::PipelineError;

/// Resolved final-assembly path for every tile of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendPlan {
    NativeAssembler {
        target_arch: String,
    },
    CrossCompiler {
        target_arch: String,
        runtime_support: PathBuf,
    },
}

impl BackendPlan {
    /// `runtime_support` is only consulted for the cross-compiler backend.
    pub fn resolve(
        backend: BackendId,
        target_arch: &str,
        runtime_support: impl FnOnce() -> Result<PathBuf, String>,
    ) -> Result<Self, PipelineError> {
        let target_arch = target_arch.to_string();
        match backend {
            BackendId::NativeAssembler => Ok(BackendPlan::NativeAssembler { target_arch }),
            BackendId::CrossCompiler => {
                let runtime_support = runtime_support()
                    .map_err(|reason| PipelineError::RuntimeSupportNotFound { reason })?;
                Ok(BackendPlan::CrossCompiler {
                    target_arch,
                    runtime_support,
                })
            }
        }
    }

    pub fn backend(&self) -> BackendId {
        match self {
            BackendPlan::NativeAssembler { .. } => BackendId::NativeAssembler,
            BackendPlan::CrossCompiler { .. } => BackendId::CrossCompiler,
        }
    }

    pub fn target_arch(&self) -> &str {
        match self {
            BackendPlan::NativeAssembler { target_arch }
            | BackendPlan::CrossCompiler { target_arch, .. } => target_arch,
        }
    }

    pub fn runtime_support(&self) -> Option<&Path> {
        match self {
            BackendPlan::NativeAssembler { .. } => None,
            BackendPlan::CrossCompiler {
                runtime_support, ..
            } => Some(runtime_support),
        }
    }
}

/// Maps a backend name to its id; unknown names are configuration errors.
pub fn select_backend(name: &str) -> Result<BackendId, PipelineError> {
    BackendId::parse(name).ok_or_else(|| PipelineError::InvalidBackend {
        name: name.to_string(),
    })
}

/// How the target architecture handed to `llc`/`clang` is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetArchSelection {
    Fixed(String),
    /// Ask the address-resolved module (`aie-translate --aie-generate-target-arch`).
    Detect,
}

impl Default for TargetArchSelection {
    fn default() -> Self {
        TargetArchSelection::Fixed(DEFAULT_TARGET_ARCH.to_string())
    }
}

impl TargetArchSelection {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s == "auto" {
            return Ok(TargetArchSelection::Detect);
        }
        normalize_target_arch(s).map(TargetArchSelection::Fixed)
    }
}

/// Normalizes a reported architecture name: `AIE` means first generation (`aie`),
/// anything else is used lowercased.
pub fn normalize_target_arch(reported: &str) -> Result<String, String> {
    let name = reported.trim();
    if name.is_empty() {
        return Err("empty target architecture".to_string());
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
        return Err(format!("invalid target architecture name: {name:?}"));
    }
    Ok(name.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_plan_never_needs_runtime_support() {
        let plan = BackendPlan::resolve(BackendId::NativeAssembler, "aie", || {
            Err("should not be asked".to_string())
        })
        .expect("native plan");
        assert_eq!(plan.backend(), BackendId::NativeAssembler);
        assert_eq!(plan.runtime_support(), None);
        assert_eq!(plan.target_arch(), "aie");
    }

    #[test]
    fn cross_plan_requires_runtime_support() {
        let err = BackendPlan::resolve(BackendId::CrossCompiler, "aie", || {
            Err("me_basic.o missing".to_string())
        })
        .expect_err("missing object");
        assert_eq!(err.code(), "AIECC_RUNTIME_SUPPORT_NOT_FOUND");

        let plan = BackendPlan::resolve(BackendId::CrossCompiler, "aie2", || {
            Ok(PathBuf::from("runtime_lib/me_basic.o"))
        })
        .expect("cross plan");
        assert_eq!(
            plan.runtime_support(),
            Some(Path::new("runtime_lib/me_basic.o"))
        );
        assert_eq!(plan.target_arch(), "aie2");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = select_backend("xbridge").expect_err("not a backend");
        assert!(matches!(err, PipelineError::InvalidBackend { .. }));
        assert_eq!(
            select_backend("native-assembler").expect("known"),
            BackendId::NativeAssembler
        );
    }

    #[test]
    fn target_arch_selection() {
        assert_eq!(
            TargetArchSelection::parse("auto").expect("auto"),
            TargetArchSelection::Detect
        );
        assert_eq!(
            TargetArchSelection::parse("AIE2").expect("fixed"),
            TargetArchSelection::Fixed("aie2".to_string())
        );
        assert!(TargetArchSelection::parse("aie; rm -rf /").is_err());
        assert_eq!(
            TargetArchSelection::default(),
            TargetArchSelection::Fixed("aie".to_string())
        );
    }

    #[test]
    fn normalize_reported_arch() {
        assert_eq!(normalize_target_arch("AIE\n").expect("aie"), "aie");
        assert_eq!(normalize_target_arch("AIE2").expect("aie2"), "aie2");
        assert!(normalize_target_arch("  ").is_err());
    }
}
