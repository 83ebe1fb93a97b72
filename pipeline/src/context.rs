use std::collections::HashMap;
use std::sync::Arc;

use compute::{ComputeArray, GaussianData, Raster};
use scene::{NamedComponent, Payload};
use token::{Token, TokenTable};

use crate::{PipelineConfig, PipelineOutput};

/// Inputs resolved for one run plus the slot the executor writes its output into.
pub struct ExecutionContext<'a> {
    pub raster: Option<&'a dyn Raster>,
    pub tokens: &'a TokenTable,
    /// Primary payload of the scene object.
    pub input: Option<Payload>,
    pub named_arrays: HashMap<u64, NamedComponent>,
    pub output: Option<PipelineOutput>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(tokens: &'a TokenTable) -> Self {
        Self {
            raster: None,
            tokens,
            input: None,
            named_arrays: HashMap::new(),
            output: None,
        }
    }

    pub fn with_raster(mut self, raster: &'a dyn Raster) -> Self {
        self.raster = Some(raster);
        self
    }

    pub fn named_array(&self, name: &Token) -> Option<&Arc<ComputeArray>> {
        self.named_arrays.get(&name.id()).map(|c| &c.array)
    }

    pub fn named_array_by_name(&self, name: &str) -> Option<&Arc<ComputeArray>> {
        self.named_array(&self.tokens.get(name)?)
    }

    /// Resolves `semantic` through the pipeline's array references, falling back to a
    /// component of the same name.
    pub fn resolve_array(&self, config: &PipelineConfig, semantic: &str) -> Option<&Arc<ComputeArray>> {
        match config.named_array_refs.get(semantic) {
            Some(token) => self.named_array(token),
            None => self.named_array_by_name(semantic),
        }
    }

    pub fn input_gaussian(&self) -> Option<&Arc<GaussianData>> {
        self.input.as_ref().and_then(Payload::as_gaussian)
    }
}
