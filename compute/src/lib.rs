mod array;
mod error;
mod gaussian;
mod interface;
mod texture;
pub mod cpu;

pub use array::ComputeArray;
pub use error::{ComputeError, Result};
pub use gaussian::{GaussianData, GaussianDataDesc};
pub use interface::*;
pub use texture::{ResourceGuard, Texture, TextureFormat};
