use std::fmt;

use token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineType {
    /// Output aliases the input.
    Null = 0,
    /// Renderable data to an image.
    Render = 1,
    /// Gaussian data to a volume.
    Raster3D = 2,
    /// File to gaussian data or a volume.
    FileImport = 3,
}

impl PipelineType {
    pub fn id(self) -> u64 {
        self as u64
    }

    pub fn is_conversion(self) -> bool {
        self != Self::Render
    }
}

impl fmt::Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "Null",
            Self::Render => "Render",
            Self::Raster3D => "Raster3D",
            Self::FileImport => "FileImport",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineStatus {
    #[default]
    NotRun,
    Running,
    Completed,
    Failed,
    /// Inputs or parameters changed since the last run.
    Dirty,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Key of an unscoped pipeline.
pub fn make_pipeline_key(ty: PipelineType, name: Option<&Token>) -> u64 {
    (ty.id() << 32) | name.map_or(0, Token::id)
}

/// Key of a pipeline attached to one scene object.
pub fn make_object_pipeline_key(
    scene: Option<&Token>,
    object: Option<&Token>,
    ty: PipelineType,
    name: Option<&Token>,
) -> u64 {
    let mut key = scene.map_or(0, Token::id);
    key = key.rotate_left(13) ^ object.map_or(0, Token::id);
    key = key.rotate_left(17) ^ (ty.id() << 32);
    key.rotate_left(7) ^ name.map_or(0, Token::id)
}
