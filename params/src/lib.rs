mod block;
mod config;
mod error;
mod reflect;
mod scalar;
mod store;
mod widget;

pub use block::ParamBlock;
pub use config::ParamsConfig;
pub use error::{ParamsError, Result};
pub use reflect::{ReflectField, ReflectType, copy_by_name};
pub use scalar::ScalarKind;
pub use store::{SHADER_PARAMS_KEY, ShaderParam, ShaderParams};
pub use widget::{Widget, WidgetKind, apply_edit};
