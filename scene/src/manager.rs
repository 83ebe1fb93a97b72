use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use compute::{ComputeArray, GaussianData};
use params::{ParamBlock, ShaderParams};
use token::Token;
use tracing::debug;

use crate::object::{NamedComponent, Payload, SceneObject, make_key};
use crate::{CameraView, Result, SceneError};

/// Handles displaced by a replacement or removal.
///
/// Keep the record alive until no in-flight frame can reference the old data, then drop it.
#[derive(Debug, Default)]
pub struct Retired {
    pub payload: Option<Payload>,
    pub params: Option<Arc<ParamBlock>>,
    pub output: Option<Payload>,
}

impl Retired {
    pub fn is_empty(&self) -> bool {
        self.payload.is_none() && self.params.is_none() && self.output.is_none()
    }
}

/// Owner of every scene object, keyed by `(scene, name)`.
#[derive(Default)]
pub struct SceneManager {
    objects: Mutex<HashMap<u64, SceneObject>>,
}

impl SceneManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, SceneObject>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts or replaces the object at `(scene, name)`.
    ///
    /// Re-adding the payload already owned keeps the existing handle. Passing no parameter block
    /// keeps the one already attached. Named components survive a replacement.
    pub fn add(
        &self,
        scene: &Token,
        name: &Token,
        payload: Payload,
        params: Option<Arc<ParamBlock>>,
        shader_name: Option<Token>,
    ) -> Retired {
        let key = make_key(scene, name);
        let mut objects = self.lock();

        let Some(object) = objects.get_mut(&key) else {
            let mut object = SceneObject::new(scene.clone(), name.clone(), payload);
            object.params = params;
            object.shader_name = shader_name;
            debug!("Added {:?} object {}/{}", object.object_type(), scene, name);
            objects.insert(key, object);
            return Retired::default();
        };

        let mut retired = Retired::default();
        if !object.payload.ptr_eq(&payload) {
            let previous = std::mem::replace(&mut object.payload, payload);
            retired.payload = Some(previous);
            retired.output = object.output.take();
        }
        if let Some(params) = params {
            let same = object.params.as_ref().is_some_and(|p| Arc::ptr_eq(p, &params));
            if !same {
                retired.params = object.params.replace(params);
            }
        }
        if shader_name.is_some() {
            object.shader_name = shader_name;
        }
        debug!("Replaced {:?} object {}/{}", object.object_type(), scene, name);
        retired
    }

    pub fn add_nanovdb(
        &self,
        scene: &Token,
        name: &Token,
        array: Arc<ComputeArray>,
        params: Option<Arc<ParamBlock>>,
        shader_name: Option<Token>,
    ) -> Retired {
        self.add(scene, name, Payload::NanoVdb(array), params, shader_name)
    }

    pub fn add_gaussian_data(
        &self,
        scene: &Token,
        name: &Token,
        data: Arc<GaussianData>,
        params: Option<Arc<ParamBlock>>,
        shader_name: Option<Token>,
    ) -> Retired {
        self.add(scene, name, Payload::GaussianData(data), params, shader_name)
    }

    pub fn add_array(&self, scene: &Token, name: &Token, array: Arc<ComputeArray>) -> Retired {
        self.add(scene, name, Payload::Array(array), None, None)
    }

    /// Stores a copy of `camera`; the caller keeps ownership of its own view.
    ///
    /// Returns the stored copy and whatever it replaced.
    pub fn add_camera(&self, scene: &Token, name: &Token, camera: &CameraView) -> (Arc<CameraView>, Retired) {
        let copy = Arc::new(camera.clone());
        let retired = self.add(scene, name, Payload::Camera(copy.clone()), None, None);
        (copy, retired)
    }

    pub fn remove(&self, scene: &Token, name: &Token) -> Option<Retired> {
        let object = self.lock().remove(&make_key(scene, name))?;
        debug!("Removed object {}/{}", scene, name);
        Some(Retired {
            payload: Some(object.payload),
            params: object.params,
            output: object.output,
        })
    }

    /// Snapshot of the object's handles.
    pub fn get(&self, scene: &Token, name: &Token) -> Option<SceneObject> {
        self.lock().get(&make_key(scene, name)).cloned()
    }

    pub fn contains(&self, scene: &Token, name: &Token) -> bool {
        self.lock().contains_key(&make_key(scene, name))
    }

    /// Runs `f` with the manager lock held.
    pub fn with_object<R>(&self, scene: &Token, name: &Token, f: impl FnOnce(&SceneObject) -> R) -> Option<R> {
        self.lock().get(&make_key(scene, name)).map(f)
    }

    pub fn with_object_mut<R>(
        &self,
        scene: &Token,
        name: &Token,
        f: impl FnOnce(&mut SceneObject) -> R,
    ) -> Option<R> {
        self.lock().get_mut(&make_key(scene, name)).map(f)
    }

    pub fn for_each_object(&self, mut f: impl FnMut(&SceneObject)) {
        for object in self.lock().values() {
            f(object);
        }
    }

    pub fn objects_in_scene(&self, scene: &Token) -> Vec<SceneObject> {
        let mut objects: Vec<_> = self.lock().values().filter(|o| &o.scene == scene).cloned().collect();
        objects.sort_by_key(|o| o.name.id());
        objects
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Empties the manager and hands back everything it owned.
    pub fn clear(&self) -> Vec<Retired> {
        self.lock()
            .drain()
            .map(|(_, o)| Retired {
                payload: Some(o.payload),
                params: o.params,
                output: o.output,
            })
            .collect()
    }

    pub fn set_params(
        &self,
        scene: &Token,
        name: &Token,
        params: Arc<ParamBlock>,
        shader_name: Option<Token>,
    ) -> Result<Option<Arc<ParamBlock>>> {
        self.with_object_mut(scene, name, |object| {
            if shader_name.is_some() {
                object.shader_name = shader_name;
            }
            object.params.replace(params)
        })
        .ok_or_else(|| not_found(scene, name))
    }

    pub fn params(&self, scene: &Token, name: &Token) -> Option<Arc<ParamBlock>> {
        self.with_object(scene, name, |o| o.params.clone()).flatten()
    }

    /// Installs a pipeline result, returning the one it replaces.
    pub fn set_output(&self, scene: &Token, name: &Token, output: Payload) -> Result<Option<Payload>> {
        self.with_object_mut(scene, name, |object| object.output.replace(output))
            .ok_or_else(|| not_found(scene, name))
    }

    pub fn output(&self, scene: &Token, name: &Token) -> Option<Payload> {
        self.with_object(scene, name, |o| o.output.clone()).flatten()
    }

    pub fn add_named_array(
        &self,
        scene: &Token,
        name: &Token,
        component: &Token,
        array: Arc<ComputeArray>,
    ) -> Result<Option<Arc<ComputeArray>>> {
        self.with_object_mut(scene, name, |object| {
            object
                .named_components
                .insert(
                    component.id(),
                    NamedComponent {
                        name: component.clone(),
                        array,
                    },
                )
                .map(|c| c.array)
        })
        .ok_or_else(|| not_found(scene, name))
    }

    pub fn named_array(&self, scene: &Token, name: &Token, component: &Token) -> Option<Arc<ComputeArray>> {
        self.with_object(scene, name, |o| o.named_array(component).cloned()).flatten()
    }

    pub fn remove_named_array(
        &self,
        scene: &Token,
        name: &Token,
        component: &Token,
    ) -> Result<Option<Arc<ComputeArray>>> {
        self.with_object_mut(scene, name, |object| {
            object.named_components.remove(&component.id()).map(|c| c.array)
        })
        .ok_or_else(|| not_found(scene, name))
    }

    /// Pushes the store's current values for `shader` into every object bound to it.
    ///
    /// Returns the number of parameter blocks updated.
    pub fn refresh_params_for_shader(&self, shader: &Token, store: &mut ShaderParams) -> usize {
        let Some(descriptor) = store.descriptor(shader.as_str()) else {
            return 0;
        };
        let values = descriptor.default_bytes();

        let blocks: Vec<Arc<ParamBlock>> = self
            .lock()
            .values()
            .filter(|o| o.shader_name.as_ref() == Some(shader))
            .filter_map(|o| o.params.clone())
            .collect();

        for block in &blocks {
            block.copy_from(&descriptor, &values);
        }
        blocks.len()
    }
}

fn not_found(scene: &Token, name: &Token) -> SceneError {
    SceneError::ObjectNotFound {
        scene: scene.to_string(),
        name: name.to_string(),
    }
}
