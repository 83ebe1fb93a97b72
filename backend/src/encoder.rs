use compute::{Texture, TextureFormat};

use crate::error::{Result, ServerError};

const START_CODE: [u8; 4] = [0, 0, 0, 1];
// nal_ref_idc 0, nal_unit_type 24 (unspecified)
const RAW_FRAME_NAL_HEADER: u8 = 0x18;

/// Two-plane YUV 4:2:0 surface: R8 luma and interleaved RG8 chroma at half resolution.
#[derive(Debug)]
pub struct Nv12Surface {
    luma: Texture,
    chroma: Texture,
}

fn bt601(rgb: [f32; 3]) -> (u8, u8, u8) {
    let [r, g, b] = rgb;
    let y = 16.0 + 65.481 * r + 128.553 * g + 24.966 * b;
    let u = 128.0 - 37.797 * r - 74.203 * g + 112.0 * b;
    let v = 128.0 + 112.0 * r - 93.786 * g - 18.214 * b;
    let quantize = |c: f32| c.round().clamp(0.0, 255.0) as u8;
    (quantize(y), quantize(u), quantize(v))
}

impl Nv12Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            luma: Texture::new(TextureFormat::R8Unorm, width, height),
            chroma: Texture::new(TextureFormat::Rg8Unorm, width.div_ceil(2), height.div_ceil(2)),
        }
    }

    pub fn width(&self) -> u32 {
        self.luma.width()
    }

    pub fn height(&self) -> u32 {
        self.luma.height()
    }

    pub fn luma(&self) -> &Texture {
        &self.luma
    }

    pub fn chroma(&self) -> &Texture {
        &self.chroma
    }

    /// Converts an RGBA8 frame into the surface, averaging chroma over each 2x2 block.
    pub fn copy_from_rgba(&mut self, frame: &Texture) -> Result<()> {
        if frame.format() != TextureFormat::Rgba8Unorm {
            return Err(ServerError::FrameFormat);
        }
        if (frame.width(), frame.height()) != (self.width(), self.height()) {
            return Err(ServerError::SurfaceSize {
                expected: (self.width(), self.height()),
                actual: (frame.width(), frame.height()),
            });
        }

        let rgb = |x: u32, y: u32| {
            let p = frame.pixel(x, y);
            [p[0] as f32 / 255.0, p[1] as f32 / 255.0, p[2] as f32 / 255.0]
        };

        for y in 0..self.height() {
            for x in 0..self.width() {
                self.luma.pixel_mut(x, y)[0] = bt601(rgb(x, y)).0;
            }
        }

        for cy in 0..self.chroma.height() {
            for cx in 0..self.chroma.width() {
                let mut sum = [0.0f32; 3];
                let mut count = 0.0;
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let (x, y) = (cx * 2 + dx, cy * 2 + dy);
                    if x < self.width() && y < self.height() {
                        let c = rgb(x, y);
                        sum = [sum[0] + c[0], sum[1] + c[1], sum[2] + c[2]];
                        count += 1.0;
                    }
                }
                let (_, u, v) = bt601(sum.map(|c| c / count));
                self.chroma.pixel_mut(cx, cy).copy_from_slice(&[u, v]);
            }
        }
        Ok(())
    }

    fn append_planes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.luma.as_bytes());
        out.extend_from_slice(self.chroma.as_bytes());
    }
}

/// Hardware video encoder seam: the viewport writes into the front surface and presents.
pub trait VideoEncoder: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn front_surface(&mut self) -> &mut Nv12Surface;
    /// Encodes the front surface as frame `frame_id`.
    fn present(&mut self, frame_id: u64) -> Result<()>;
    /// Bitstream produced by the last `present`.
    fn map_data(&self) -> &[u8];
}

/// Appends `payload` with emulation prevention bytes so no start code appears inside it.
fn escape_nal_payload(payload: &[u8], out: &mut Vec<u8>) {
    let mut zeros = 0;
    for &byte in payload {
        if zeros >= 2 && byte <= 3 {
            out.push(3);
            zeros = 0;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
}

/// Reference encoder wrapping uncompressed NV12 frames in Annex-B NAL units.
///
/// Each unit carries frame id, width and height (little endian) followed by both planes.
#[derive(Debug)]
pub struct RawNv12Encoder {
    surface: Nv12Surface,
    bitstream: Vec<u8>,
    scratch: Vec<u8>,
}

impl RawNv12Encoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: Nv12Surface::new(width, height),
            bitstream: Vec::new(),
            scratch: Vec::new(),
        }
    }
}

impl VideoEncoder for RawNv12Encoder {
    fn width(&self) -> u32 {
        self.surface.width()
    }

    fn height(&self) -> u32 {
        self.surface.height()
    }

    fn front_surface(&mut self) -> &mut Nv12Surface {
        &mut self.surface
    }

    fn present(&mut self, frame_id: u64) -> Result<()> {
        self.scratch.clear();
        self.scratch.extend_from_slice(&frame_id.to_le_bytes());
        self.scratch.extend_from_slice(&self.surface.width().to_le_bytes());
        self.scratch.extend_from_slice(&self.surface.height().to_le_bytes());
        self.surface.append_planes(&mut self.scratch);

        self.bitstream.clear();
        self.bitstream.extend_from_slice(&START_CODE);
        self.bitstream.push(RAW_FRAME_NAL_HEADER);
        escape_nal_payload(&self.scratch, &mut self.bitstream);
        Ok(())
    }

    fn map_data(&self) -> &[u8] {
        &self.bitstream
    }
}
