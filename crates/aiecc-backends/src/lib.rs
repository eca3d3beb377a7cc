//! Final-assembly backend registry.
//!
//! This crate exists so both:
//! - the pipeline driver (library)
//! - the command line surface
//!
//! can share an authoritative list of backends and the external tools each one is
//! allowed to run.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[cfg_attr(feature = "clap", clap(rename_all = "kebab_case"))]
pub enum BackendId {
    /// `llc` to a target object, then `xbridge` links it with the tile's bcf.
    NativeAssembler,
    /// `clang` compiles, adds the runtime-support object and links with the tile's
    /// linker script in one step.
    #[default]
    CrossCompiler,
}

pub const NATIVE_CODEGEN_TOOL: &str = "llc";
pub const NATIVE_LINKER_TOOL: &str = "xbridge";
pub const CROSS_COMPILER_TOOL: &str = "clang";

impl BackendId {
    pub const ALL: [BackendId; 2] = [BackendId::NativeAssembler, BackendId::CrossCompiler];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendId::NativeAssembler => "native-assembler",
            BackendId::CrossCompiler => "cross-compiler",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "native-assembler" => Some(BackendId::NativeAssembler),
            "cross-compiler" => Some(BackendId::CrossCompiler),
            _ => None,
        }
    }

    /// Tools this backend runs after the shared per-tile steps, in order.
    pub fn final_tools(self) -> &'static [&'static str] {
        match self {
            BackendId::NativeAssembler => &[NATIVE_CODEGEN_TOOL, NATIVE_LINKER_TOOL],
            BackendId::CrossCompiler => &[CROSS_COMPILER_TOOL],
        }
    }

    /// True if the backend needs the runtime-support object on the link line.
    pub fn needs_runtime_support(self) -> bool {
        matches!(self, BackendId::CrossCompiler)
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_backend() {
        for &b in &BackendId::ALL {
            assert_eq!(BackendId::parse(b.as_str()), Some(b));
        }
    }

    #[test]
    fn parse_rejects_unknown_names() {
        assert_eq!(BackendId::parse("xbridge"), None);
        assert_eq!(BackendId::parse(""), None);
        assert_eq!(BackendId::parse("Cross-Compiler"), None);
    }

    #[test]
    fn final_tools_are_disjoint() {
        let native = BackendId::NativeAssembler.final_tools();
        let cross = BackendId::CrossCompiler.final_tools();
        for t in native {
            assert!(!cross.contains(t), "{t} shared between backends");
        }
    }

    #[test]
    fn only_cross_compiler_needs_runtime_support() {
        assert!(BackendId::CrossCompiler.needs_runtime_support());
        assert!(!BackendId::NativeAssembler.needs_runtime_support());
        assert_eq!(BackendId::default(), BackendId::CrossCompiler);
    }
}
