use std::sync::Arc;

use bytemuck::Pod;
use params::{ParamBlock, ReflectType, copy_by_name};
use token::Token;

/// Client-side copy of an object's parameters, laid out as the client's own struct.
///
/// Written back by `Editor::unmap_params`. The write is refused when the object's parameter
/// layout changed after mapping.
pub struct MappedParams {
    pub(crate) scene: Token,
    pub(crate) name: Token,
    pub(crate) descriptor: Arc<ReflectType>,
    pub(crate) bytes: Vec<u8>,
    pub(crate) source: Arc<ParamBlock>,
    pub(crate) source_layout: Arc<ReflectType>,
}

impl MappedParams {
    pub(crate) fn new(scene: Token, name: Token, descriptor: &ReflectType, source: Arc<ParamBlock>) -> Self {
        let (source_layout, values) = source.snapshot();
        let mut bytes = descriptor.default_bytes();
        copy_by_name(descriptor, &mut bytes, &source_layout, &values);
        Self {
            scene,
            name,
            descriptor: Arc::new(descriptor.clone()),
            bytes,
            source,
            source_layout,
        }
    }

    pub fn scene(&self) -> &Token {
        &self.scene
    }

    pub fn name(&self) -> &Token {
        &self.name
    }

    pub fn descriptor(&self) -> &ReflectType {
        &self.descriptor
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn get<T: Pod>(&self, field: &str) -> Option<T> {
        self.descriptor.get(&self.bytes, field)
    }

    pub fn set<T: Pod>(&mut self, field: &str, value: T) -> bool {
        self.descriptor.set(&mut self.bytes, field, value)
    }

    /// Same block, same layout as when mapped.
    pub(crate) fn is_current(&self, block: &Arc<ParamBlock>) -> bool {
        Arc::ptr_eq(&self.source, block) && block.descriptor().layout_eq(&self.source_layout)
    }
}
