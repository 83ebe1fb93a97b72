use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8Unorm,
    R8Unorm,
    Rg8Unorm,
}

impl TextureFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8Unorm => 4,
            Self::R8Unorm => 1,
            Self::Rg8Unorm => 2,
        }
    }
}

/// Decrements a device's live-resource counter when dropped.
#[derive(Debug)]
pub struct ResourceGuard(Arc<AtomicUsize>);

impl ResourceGuard {
    pub fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub struct Texture {
    format: TextureFormat,
    width: u32,
    height: u32,
    data: Vec<u8>,
    _guard: Option<ResourceGuard>,
}

impl Texture {
    pub fn new(format: TextureFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            data: vec![0u8; format.bytes_per_pixel() * width as usize * height as usize],
            _guard: None,
        }
    }

    /// Texture whose lifetime is tracked by a device counter.
    pub fn tracked(format: TextureFormat, width: u32, height: u32, counter: &Arc<AtomicUsize>) -> Self {
        let mut texture = Self::new(format, width, height);
        texture._guard = Some(ResourceGuard::new(counter));
        texture
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.format.bytes_per_pixel()
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let offset = self.offset(x, y);
        &self.data[offset..offset + self.format.bytes_per_pixel()]
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let offset = self.offset(x, y);
        let bpp = self.format.bytes_per_pixel();
        &mut self.data[offset..offset + bpp]
    }

    pub fn fill(&mut self, value: &[u8]) {
        let bpp = self.format.bytes_per_pixel();
        for chunk in self.data.chunks_exact_mut(bpp) {
            let len = value.len().min(bpp);
            chunk[..len].copy_from_slice(&value[..len]);
        }
    }

    pub fn copy_from(&mut self, other: &Texture) {
        if self.format == other.format && self.data.len() == other.data.len() {
            self.data.copy_from_slice(&other.data);
        }
    }
}
