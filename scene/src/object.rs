use std::collections::HashMap;
use std::sync::Arc;

use compute::{ComputeArray, GaussianData};
use params::ParamBlock;
use token::Token;

use crate::CameraView;

/// Map key for a `(scene, name)` pair.
pub fn make_key(scene: &Token, name: &Token) -> u64 {
    debug_assert!(scene.id() < (1 << 32) && name.id() < (1 << 32));
    (scene.id() << 32) | name.id()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    NanoVdb,
    GaussianData,
    Array,
    Camera,
}

/// Shared payload of a scene object. Dropping the last handle releases the data.
#[derive(Debug, Clone)]
pub enum Payload {
    NanoVdb(Arc<ComputeArray>),
    GaussianData(Arc<GaussianData>),
    Array(Arc<ComputeArray>),
    Camera(Arc<CameraView>),
}

impl Payload {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::NanoVdb(_) => ObjectType::NanoVdb,
            Self::GaussianData(_) => ObjectType::GaussianData,
            Self::Array(_) => ObjectType::Array,
            Self::Camera(_) => ObjectType::Camera,
        }
    }

    /// Same underlying allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NanoVdb(a), Self::NanoVdb(b)) | (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(a, b),
            (Self::GaussianData(a), Self::GaussianData(b)) => Arc::ptr_eq(a, b),
            (Self::Camera(a), Self::Camera(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn as_array(&self) -> Option<&Arc<ComputeArray>> {
        match self {
            Self::NanoVdb(a) | Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_nanovdb(&self) -> Option<&Arc<ComputeArray>> {
        match self {
            Self::NanoVdb(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_gaussian(&self) -> Option<&Arc<GaussianData>> {
        match self {
            Self::GaussianData(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_camera(&self) -> Option<&Arc<CameraView>> {
        match self {
            Self::Camera(c) => Some(c),
            _ => None,
        }
    }

    /// Handles currently sharing the payload.
    pub fn strong_count(&self) -> usize {
        match self {
            Self::NanoVdb(a) | Self::Array(a) => Arc::strong_count(a),
            Self::GaussianData(g) => Arc::strong_count(g),
            Self::Camera(c) => Arc::strong_count(c),
        }
    }
}

/// Auxiliary array attached to an object and looked up by name from pipelines.
#[derive(Debug, Clone)]
pub struct NamedComponent {
    pub name: Token,
    pub array: Arc<ComputeArray>,
}

#[derive(Debug, Clone)]
pub struct SceneObject {
    pub scene: Token,
    pub name: Token,
    pub payload: Payload,
    pub params: Option<Arc<ParamBlock>>,
    pub shader_name: Option<Token>,
    pub named_components: HashMap<u64, NamedComponent>,
    /// Latest result of the object's conversion pipeline.
    pub output: Option<Payload>,
}

impl SceneObject {
    pub fn new(scene: Token, name: Token, payload: Payload) -> Self {
        Self {
            scene,
            name,
            payload,
            params: None,
            shader_name: None,
            named_components: HashMap::new(),
            output: None,
        }
    }

    pub fn key(&self) -> u64 {
        make_key(&self.scene, &self.name)
    }

    pub fn object_type(&self) -> ObjectType {
        self.payload.object_type()
    }

    pub fn named_array(&self, name: &Token) -> Option<&Arc<ComputeArray>> {
        self.named_components.get(&name.id()).map(|c| &c.array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use token::TokenTable;

    #[test]
    fn keys_pack_scene_and_name() {
        let tokens = TokenTable::new();
        let scene = tokens.get_or_create("S");
        let name = tokens.get_or_create("G");
        assert_eq!(make_key(&scene, &name), (1 << 32) | 2);
        assert_ne!(make_key(&scene, &name), make_key(&name, &scene));
    }

    #[test]
    fn payload_identity() {
        let array = Arc::new(ComputeArray::new(4, 1));
        let a = Payload::NanoVdb(array.clone());
        let b = Payload::Array(array.clone());
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&Payload::NanoVdb(array)));
        assert_eq!(a.strong_count(), 3);
        assert_eq!(a.object_type(), ObjectType::NanoVdb);
    }
}
