use std::path::{Path, PathBuf};

use aiecc_contracts::{ADDRESS_RESOLVED_FILE, FLOW_RESOLVED_FILE, HOST_INTERFACE_FILE};
use serde::Serialize;

use crate::error::PipelineError;
use crate::tiles::TileCoordinate;

/// Per-tile artifact kinds, in the order the tile pipeline produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    LoweredIr,
    ControlFile,
    LinkerScript,
    LlvmIr,
    StrippedIr,
    Object,
    Executable,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 7] = [
        ArtifactKind::LoweredIr,
        ArtifactKind::ControlFile,
        ArtifactKind::LinkerScript,
        ArtifactKind::LlvmIr,
        ArtifactKind::StrippedIr,
        ArtifactKind::Object,
        ArtifactKind::Executable,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::LoweredIr => "mlir",
            ArtifactKind::ControlFile => "bcf",
            ArtifactKind::LinkerScript => "ld.script",
            ArtifactKind::LlvmIr => "ll",
            ArtifactKind::StrippedIr => "stripped.ll",
            ArtifactKind::Object => "o",
            ArtifactKind::Executable => "elf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayArtifact {
    AddressResolved,
    FlowResolved,
    HostInterface,
}

impl ArrayArtifact {
    pub fn file_name(self) -> &'static str {
        match self {
            ArrayArtifact::AddressResolved => ADDRESS_RESOLVED_FILE,
            ArrayArtifact::FlowResolved => FLOW_RESOLVED_FILE,
            ArrayArtifact::HostInterface => HOST_INTERFACE_FILE,
        }
    }
}

/// Working directory of one compilation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkArea {
    root: PathBuf,
}

impl WorkArea {
    /// Creates `root` (and parents) unless it already is a directory.
    pub fn ensure(root: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let root = root.into();
        match std::fs::create_dir_all(&root) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists && root.is_dir() => {}
            Err(source) => return Err(PipelineError::WorkArea { path: root, source }),
        }
        if !root.is_dir() {
            return Err(PipelineError::WorkArea {
                path: root,
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "path exists and is not a directory",
                ),
            });
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn array_path(&self, artifact: ArrayArtifact) -> PathBuf {
        self.root.join(artifact.file_name())
    }

    pub fn path_for(&self, tile: TileCoordinate, kind: ArtifactKind) -> PathBuf {
        self.root.join(format!(
            "core_{}_{}.{}",
            tile.col,
            tile.row,
            kind.extension()
        ))
    }

    pub fn tile_paths(&self, tile: TileCoordinate) -> Vec<PathBuf> {
        ArtifactKind::ALL
            .iter()
            .map(|&kind| self.path_for(tile, kind))
            .collect()
    }

    /// Removes every tile-scope file of `tile`; files that were never written are skipped.
    pub fn discard_tile_artifacts(&self, tile: TileCoordinate) -> std::io::Result<()> {
        for path in self.tile_paths(tile) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
