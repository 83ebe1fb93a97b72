use std::path::PathBuf;

use compute::{ComputeArray, GaussianData};
use scene::{Payload, Retired};
use token::Token;

/// Result of a conversion pipeline, stored as the scene object's output.
#[derive(Debug, Clone)]
pub enum PipelineOutput {
    /// The input payload itself, shared without a copy.
    Passthrough(Payload),
    Produced(Payload),
}

impl PipelineOutput {
    pub fn payload(&self) -> &Payload {
        match self {
            Self::Passthrough(p) | Self::Produced(p) => p,
        }
    }

    pub fn into_payload(self) -> Payload {
        match self {
            Self::Passthrough(p) | Self::Produced(p) => p,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough(_))
    }
}

/// Data produced by the import worker.
#[derive(Debug)]
pub enum ImportedData {
    NanoVdb(ComputeArray),
    Gaussian(GaussianData),
}

/// A finished import, already installed in the scene when it succeeded.
#[derive(Debug)]
pub struct ImportCompletion {
    pub filepath: PathBuf,
    pub scene: Token,
    pub name: Token,
    pub payload: Option<Payload>,
    /// Owner displaced by the import. Drop it once no frame references it.
    pub retired: Retired,
    pub error: Option<String>,
}

impl ImportCompletion {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}
