use bytemuck::Pod;
use serde_json::Value;

use crate::ScalarKind;

/// One field of a reflected struct.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectField {
    pub name: String,
    pub kind: ScalarKind,
    pub offset: usize,
    pub element_count: usize,
    /// Packed default value, `size()` bytes long.
    pub default: Vec<u8>,
}

impl ReflectField {
    pub fn size(&self) -> usize {
        self.kind.size() * self.element_count
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.size()
    }
}

/// Descriptor for a packed parameter struct.
///
/// Fields are laid out back to back in declaration order. Two descriptors with the same
/// [`layout_eq`](ReflectType::layout_eq) describe interchangeable byte blobs; otherwise
/// [`copy_by_name`] migrates values between them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReflectType {
    name: String,
    fields: Vec<ReflectField>,
    size: usize,
}

impl ReflectType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            size: 0,
        }
    }

    /// Appends a field. `default` is truncated or zero-padded to the field size.
    pub fn with_field(
        mut self,
        name: impl Into<String>,
        kind: ScalarKind,
        element_count: usize,
        default: &[u8],
    ) -> Self {
        let size = kind.size() * element_count;
        let mut bytes = vec![0u8; size];
        let len = default.len().min(size);
        bytes[..len].copy_from_slice(&default[..len]);
        self.fields.push(ReflectField {
            name: name.into(),
            kind,
            offset: self.size,
            element_count,
            default: bytes,
        });
        self.size += size;
        self
    }

    pub fn with_f32(self, name: impl Into<String>, value: f32) -> Self {
        self.with_field(name, ScalarKind::F32, 1, &value.to_le_bytes())
    }

    pub fn with_u32(self, name: impl Into<String>, value: u32) -> Self {
        self.with_field(name, ScalarKind::U32, 1, &value.to_le_bytes())
    }

    pub fn with_i32(self, name: impl Into<String>, value: i32) -> Self {
        self.with_field(name, ScalarKind::I32, 1, &value.to_le_bytes())
    }

    pub fn with_bool(self, name: impl Into<String>, value: bool) -> Self {
        self.with_field(name, ScalarKind::Bool, 1, &u32::from(value).to_le_bytes())
    }

    /// Builds a descriptor from a compiler reflection document
    /// (`{"shaderParams": {name: {type, elementCount}}}`). Padding fields are skipped.
    pub fn from_reflection(name: impl Into<String>, doc: &Value) -> Option<Self> {
        let params = doc.get("shaderParams")?.as_object()?;
        let mut ty = Self::new(name);
        for (field, value) in params {
            if field.contains("_pad") {
                continue;
            }
            let kind = ScalarKind::from_reflection(value.get("type")?.as_str().unwrap_or(""));
            let count = if kind == ScalarKind::Bool {
                1
            } else {
                value.get("elementCount").and_then(Value::as_u64).unwrap_or(1) as usize
            };
            ty = ty.with_field(field.clone(), kind, count, &[]);
        }
        Some(ty)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[ReflectField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ReflectField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Same fields with the same kinds, counts and offsets. Names of the types and defaults
    /// are not compared.
    pub fn layout_eq(&self, other: &Self) -> bool {
        self.size == other.size
            && self.fields.len() == other.fields.len()
            && self.fields.iter().zip(&other.fields).all(|(a, b)| {
                a.name == b.name
                    && a.kind == b.kind
                    && a.offset == b.offset
                    && a.element_count == b.element_count
            })
    }

    pub fn default_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.size];
        for field in &self.fields {
            bytes[field.range()].copy_from_slice(&field.default);
        }
        bytes
    }

    /// Replaces every field default with the value held in `bytes`.
    pub fn with_defaults_from(mut self, bytes: &[u8]) -> Self {
        for field in &mut self.fields {
            if let Some(src) = bytes.get(field.range()) {
                field.default.copy_from_slice(src);
            }
        }
        self
    }

    pub fn field_bytes<'a>(&self, bytes: &'a [u8], name: &str) -> Option<&'a [u8]> {
        bytes.get(self.field(name)?.range())
    }

    pub fn field_bytes_mut<'a>(&self, bytes: &'a mut [u8], name: &str) -> Option<&'a mut [u8]> {
        bytes.get_mut(self.field(name)?.range())
    }

    /// Reads the first element of a field as `T`. The size of `T` must not exceed the field.
    pub fn get<T: Pod>(&self, bytes: &[u8], name: &str) -> Option<T> {
        let src = self.field_bytes(bytes, name)?;
        (size_of::<T>() <= src.len()).then(|| bytemuck::pod_read_unaligned(&src[..size_of::<T>()]))
    }

    pub fn set<T: Pod>(&self, bytes: &mut [u8], name: &str, value: T) -> bool {
        let Some(dst) = self.field_bytes_mut(bytes, name) else {
            return false;
        };
        let src = bytemuck::bytes_of(&value);
        if src.len() > dst.len() {
            return false;
        }
        dst[..src.len()].copy_from_slice(src);
        true
    }
}

/// Copies every field present in both descriptors with the same name and kind.
///
/// Array fields copy `min(count)` elements. Destination fields without a counterpart keep
/// their current bytes. Returns the number of fields copied.
pub fn copy_by_name(dst_ty: &ReflectType, dst: &mut [u8], src_ty: &ReflectType, src: &[u8]) -> usize {
    let mut copied = 0;
    for dst_field in &dst_ty.fields {
        let Some(src_field) = src_ty.field(&dst_field.name) else {
            continue;
        };
        if src_field.kind != dst_field.kind {
            continue;
        }
        let len = dst_field.kind.size() * dst_field.element_count.min(src_field.element_count);
        let (Some(from), Some(to)) = (
            src.get(src_field.offset..src_field.offset + len),
            dst.get_mut(dst_field.offset..dst_field.offset + len),
        ) else {
            continue;
        };
        to.copy_from_slice(from);
        copied += 1;
    }
    copied
}
