use half::f16;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Element type of a reflected field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    F32,
    F16,
    F64,
    I32,
    U32,
    I64,
    U64,
    /// Shader bools occupy four bytes.
    Bool,
}

impl ScalarKind {
    pub const fn size(self) -> usize {
        match self {
            Self::F16 => 2,
            Self::F32 | Self::I32 | Self::U32 | Self::Bool => 4,
            Self::F64 | Self::I64 | Self::U64 => 8,
        }
    }

    /// Maps a reflection type name. Unknown names fall back to `F32`.
    pub fn from_reflection(name: &str) -> Self {
        match name {
            "int" => Self::I32,
            "uint" => Self::U32,
            "int64" => Self::I64,
            "uint64" => Self::U64,
            "float16" => Self::F16,
            "double" => Self::F64,
            "bool" => Self::Bool,
            _ => Self::F32,
        }
    }

    pub const fn reflection_name(self) -> &'static str {
        match self {
            Self::F32 => "float",
            Self::F16 => "float16",
            Self::F64 => "double",
            Self::I32 => "int",
            Self::U32 => "uint",
            Self::I64 => "int64",
            Self::U64 => "uint64",
            Self::Bool => "bool",
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F16 | Self::F64)
    }

    /// Reads one element. `src` must hold at least [`Self::size`] bytes.
    pub fn read_f64(self, src: &[u8]) -> f64 {
        let size = self.size();
        if src.len() < size {
            return 0.0;
        }
        let src = &src[..size];
        match self {
            Self::F32 => bytemuck::pod_read_unaligned::<f32>(src) as f64,
            Self::F16 => f16::from_bits(bytemuck::pod_read_unaligned::<u16>(src)).to_f64(),
            Self::F64 => bytemuck::pod_read_unaligned::<f64>(src),
            Self::I32 => bytemuck::pod_read_unaligned::<i32>(src) as f64,
            Self::U32 | Self::Bool => bytemuck::pod_read_unaligned::<u32>(src) as f64,
            Self::I64 => bytemuck::pod_read_unaligned::<i64>(src) as f64,
            Self::U64 => bytemuck::pod_read_unaligned::<u64>(src) as f64,
        }
    }

    /// Writes one element, saturating integers. Short destinations are left untouched.
    pub fn write_f64(self, dst: &mut [u8], value: f64) {
        let size = self.size();
        if dst.len() < size {
            return;
        }
        let dst = &mut dst[..size];
        match self {
            Self::F32 => dst.copy_from_slice(&(value as f32).to_le_bytes()),
            Self::F16 => dst.copy_from_slice(&f16::from_f64(value).to_le_bytes()),
            Self::F64 => dst.copy_from_slice(&value.to_le_bytes()),
            Self::I32 => dst.copy_from_slice(&(value as i32).to_le_bytes()),
            Self::U32 => dst.copy_from_slice(&(value as u32).to_le_bytes()),
            Self::Bool => dst.copy_from_slice(&u32::from(value != 0.0).to_le_bytes()),
            Self::I64 => dst.copy_from_slice(&(value as i64).to_le_bytes()),
            Self::U64 => dst.copy_from_slice(&(value as u64).to_le_bytes()),
        }
    }

    /// Writes a JSON number or bool. Anything else writes `fallback`.
    pub fn write_json(self, dst: &mut [u8], value: &Value, fallback: f64) {
        let size = self.size();
        if dst.len() < size {
            return;
        }
        match (self, value) {
            (Self::I64, Value::Number(n)) if n.is_i64() => {
                dst[..size].copy_from_slice(&n.as_i64().unwrap_or_default().to_le_bytes())
            }
            (Self::U64, Value::Number(n)) if n.is_u64() => {
                dst[..size].copy_from_slice(&n.as_u64().unwrap_or_default().to_le_bytes())
            }
            (_, Value::Number(n)) => self.write_f64(dst, n.as_f64().unwrap_or(fallback)),
            (_, Value::Bool(b)) => self.write_f64(dst, if *b { 1.0 } else { 0.0 }),
            _ => self.write_f64(dst, fallback),
        }
    }

    pub fn to_json(self, src: &[u8]) -> Value {
        match self {
            Self::Bool => Value::Bool(self.read_f64(src) != 0.0),
            Self::I32 | Self::I64 => Value::from(self.read_f64(src) as i64),
            Self::U32 | Self::U64 => Value::from(self.read_f64(src) as u64),
            _ => Value::from(self.read_f64(src)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reflection_names_map_to_sizes() {
        assert_eq!(ScalarKind::from_reflection("").size(), 4);
        assert_eq!(ScalarKind::from_reflection("void"), ScalarKind::F32);
        assert_eq!(ScalarKind::from_reflection("float16").size(), 2);
        assert_eq!(ScalarKind::from_reflection("double").size(), 8);
        assert_eq!(ScalarKind::from_reflection("bool").size(), 4);
        assert_eq!(ScalarKind::from_reflection("mystery"), ScalarKind::F32);
    }

    #[test]
    fn json_values_land_in_bytes() {
        let mut buf = [0u8; 8];
        ScalarKind::I32.write_json(&mut buf, &json!(-3), 0.0);
        assert_eq!(ScalarKind::I32.read_f64(&buf), -3.0);
        ScalarKind::F16.write_json(&mut buf, &json!(0.5), 0.0);
        assert_eq!(ScalarKind::F16.read_f64(&buf), 0.5);
        ScalarKind::Bool.write_json(&mut buf, &json!(true), 0.0);
        assert_eq!(ScalarKind::Bool.to_json(&buf), json!(true));
        ScalarKind::U64.write_json(&mut buf, &json!(u64::MAX), 0.0);
        assert_eq!(bytemuck::pod_read_unaligned::<u64>(&buf), u64::MAX);
        ScalarKind::F32.write_json(&mut buf, &json!("nope"), 2.0);
        assert_eq!(ScalarKind::F32.read_f64(&buf), 2.0);
    }
}
