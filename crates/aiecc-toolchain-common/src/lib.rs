pub mod runtime_paths;
pub mod tool_paths;
