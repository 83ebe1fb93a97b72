mod camera;
mod error;
mod manager;
mod object;
mod view;

pub use camera::{Camera, CameraConfig, CameraState, CameraView};
pub use error::{Result, SceneError};
pub use manager::{Retired, SceneManager};
pub use object::{NamedComponent, ObjectType, Payload, SceneObject, make_key};
pub use view::{DEFAULT_SCENE_NAME, SceneView, VIEWPORT_CAMERA_NAME, ViewKind};
