use crate::{ScalarKind, ShaderParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetKind {
    Checkbox,
    Slider,
    Drag,
    /// Sixteen elements shown as four drag rows.
    Matrix4,
}

/// Snapshot of one parameter field for the properties panel.
#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub label: String,
    pub shader: String,
    pub field: String,
    pub kind: WidgetKind,
    pub scalar: ScalarKind,
    pub element_count: usize,
    pub value: Vec<u8>,
    pub min: Vec<u8>,
    pub max: Vec<u8>,
    pub step: f32,
}

const ROW_NAMES: [&str; 4] = ["x", "y", "z", "w"];

impl Widget {
    pub fn element(&self, index: usize) -> f64 {
        let size = self.scalar.size();
        self.value
            .get(index * size..(index + 1) * size)
            .map_or(0.0, |src| self.scalar.read_f64(src))
    }

    pub fn checked(&self) -> bool {
        self.element(0) != 0.0
    }

    /// Bytes to hand to [`apply_edit`] when a checkbox toggles.
    pub fn checkbox_bytes(&self, checked: bool) -> Vec<u8> {
        let mut bytes = vec![0u8; self.scalar.size()];
        self.scalar.write_f64(&mut bytes, if checked { 1.0 } else { 0.0 });
        bytes
    }

    /// Row label and bytes for each matrix row.
    pub fn rows(&self) -> Vec<(&'static str, &[u8])> {
        if self.kind != WidgetKind::Matrix4 {
            return Vec::new();
        }
        let row_len = 4 * self.scalar.size();
        ROW_NAMES
            .iter()
            .zip(self.value.chunks_exact(row_len))
            .map(|(name, row)| (*name, row))
            .collect()
    }

    /// Clamps a slider value into the field's range.
    pub fn clamp(&self, value: f64) -> f64 {
        let lo = self.scalar.read_f64(&self.min);
        let hi = self.scalar.read_f64(&self.max);
        if lo <= hi { value.clamp(lo, hi) } else { value }
    }
}

/// Writes an edited widget value back into the store.
pub fn apply_edit(store: &mut ShaderParams, widget: &Widget, value: &[u8]) -> bool {
    store.apply_edit(&widget.shader, &widget.field, value)
}
