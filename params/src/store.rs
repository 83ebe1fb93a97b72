use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use compute::{CONSTANT_BUFFER_MAX_SIZE, Compute, ComputeArray};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::{ParamsConfig, ParamsError, ReflectType, Result, ScalarKind, Widget, WidgetKind};

/// Top-level key of user parameter files and group files.
pub const SHADER_PARAMS_KEY: &str = "ShaderParams";

const DEFAULT_MIN: f64 = 0.0;
const DEFAULT_MAX: f64 = 1.0;
const DEFAULT_STEP: f32 = 0.01;

fn is_padding(name: &str) -> bool {
    name.contains("_pad")
}

/// One uniform field of a shader, with its GUI metadata and pool slot.
#[derive(Debug, Clone)]
pub struct ShaderParam {
    pub name: String,
    pub kind: ScalarKind,
    pub element_count: usize,
    pub min: Vec<u8>,
    pub max: Vec<u8>,
    pub step: f32,
    pub use_slider: bool,
    pub is_bool: bool,
    pub hidden: bool,
    pool_index: Option<usize>,
    pending_value: Option<Value>,
}

impl ShaderParam {
    fn new(name: &str, kind: ScalarKind, element_count: usize) -> Self {
        let mut param = Self {
            name: name.to_string(),
            kind,
            element_count,
            min: vec![0u8; kind.size() * element_count],
            max: vec![0u8; kind.size() * element_count],
            step: DEFAULT_STEP,
            use_slider: false,
            is_bool: false,
            hidden: false,
            pool_index: None,
            pending_value: None,
        };
        kind.write_f64(&mut param.min, DEFAULT_MIN);
        kind.write_f64(&mut param.max, DEFAULT_MAX);
        param
    }

    pub fn size(&self) -> usize {
        self.kind.size() * self.element_count
    }

    pub fn pool_index(&self) -> Option<usize> {
        self.pool_index
    }

    /// Fields with the same signature share one pool slot.
    fn same_slot(&self, other: &Self) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.element_count == other.element_count
            && self.min == other.min
            && self.max == other.max
            && self.step == other.step
    }

    fn apply_user(&mut self, entry: &Value) {
        let flag = |key: &str| entry.get(key).and_then(Value::as_bool);

        if self.kind == ScalarKind::Bool {
            if let Some(value) = entry.get("value").filter(|v| v.is_boolean()) {
                self.pending_value = Some(value.clone());
            }
        } else {
            self.pending_value = Some(entry.get("value").cloned().unwrap_or(json!(0)));
            self.kind.write_json(&mut self.min, entry.get("min").unwrap_or(&json!(DEFAULT_MIN)), DEFAULT_MIN);
            self.kind.write_json(&mut self.max, entry.get("max").unwrap_or(&json!(DEFAULT_MAX)), DEFAULT_MAX);
            self.step = entry
                .get("step")
                .and_then(Value::as_f64)
                .map_or(DEFAULT_STEP, |s| s as f32);
            if !self.kind.is_float() {
                if let Some(is_bool) = flag("isBool") {
                    self.is_bool = is_bool;
                }
            }
            if let Some(use_slider) = flag("useSlider") {
                self.use_slider = use_slider;
            }
        }
        if let Some(hidden) = flag("hidden") {
            self.hidden = hidden;
        }
    }

    fn initial_bytes(&mut self) -> Vec<u8> {
        let size = self.kind.size();
        let mut data = vec![0u8; self.size()];
        match self.pending_value.take() {
            Some(Value::Array(values)) => {
                for (i, chunk) in data.chunks_exact_mut(size).enumerate() {
                    self.kind.write_json(chunk, values.get(i).unwrap_or(&json!(0)), 0.0);
                }
            }
            Some(value) => self.kind.write_json(&mut data, &value, 0.0),
            None => {}
        }
        data
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn ensure_slot(pool: &mut Vec<Vec<u8>>, param: &mut ShaderParam) -> usize {
    if let Some(index) = param.pool_index {
        return index;
    }
    pool.push(param.initial_bytes());
    let index = pool.len() - 1;
    param.pool_index = Some(index);
    index
}

/// Reflected parameter store.
///
/// Values live in a pool of byte slots. Fields of different shaders with an identical
/// signature point at the same slot, so an edit made through one shader is seen by all.
pub struct ShaderParams {
    config: ParamsConfig,
    pool: Vec<Vec<u8>>,
    params: BTreeMap<String, Vec<ShaderParam>>,
    // group name -> pool index -> (shader, field position)
    groups: BTreeMap<String, BTreeMap<usize, (String, usize)>>,
    pending_arrays: HashMap<String, Vec<u8>>,
}

impl ShaderParams {
    pub fn new(config: ParamsConfig) -> Self {
        Self {
            config,
            pool: Vec::new(),
            params: BTreeMap::new(),
            groups: BTreeMap::new(),
            pending_arrays: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ParamsConfig {
        &self.config
    }

    pub fn is_loaded(&self, shader_name: &str) -> bool {
        self.params.contains_key(shader_name)
    }

    pub fn get(&self, shader_name: &str) -> Option<&[ShaderParam]> {
        self.params.get(shader_name).map(Vec::as_slice)
    }

    pub fn pool_index(&self, shader_name: &str, field: &str) -> Option<usize> {
        self.get(shader_name)?
            .iter()
            .find(|p| p.name == field)?
            .pool_index
    }

    pub fn has_pending_array(&self, shader_name: &str) -> bool {
        self.pending_arrays.contains_key(shader_name)
    }

    /// Reads a user or group document. A missing file is `Ok(None)`.
    fn read_user_doc(&self, name: &str) -> Result<Option<Value>> {
        let path = self.config.user_params_path(name);
        match read_json(&path) {
            Ok(doc) if doc.get(SHADER_PARAMS_KEY).is_some() => Ok(Some(doc)),
            Ok(_) => Err(ParamsError::MissingKey(path, SHADER_PARAMS_KEY)),
            Err(ParamsError::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// True when the user (or group) document exists and parses.
    pub fn is_json_loaded(&self, name: &str) -> bool {
        matches!(self.read_user_doc(name), Ok(Some(_)))
    }

    /// Loads the schema of `shader_name` from its compiled reflection and applies the user
    /// file on top. Returns false when either document is missing or malformed, in which
    /// case previously loaded state is kept.
    pub fn load(&mut self, shader_name: &str, reload: bool) -> bool {
        self.load_impl(shader_name, reload, false)
    }

    fn load_impl(&mut self, shader_name: &str, reload: bool, allocate: bool) -> bool {
        if !reload && self.params.contains_key(shader_name) {
            return true;
        }

        let reflection_path = self.config.reflection_path(shader_name);
        let reflection = match read_json(&reflection_path) {
            Ok(doc) => doc,
            Err(e) => {
                // the compiler may still be writing it
                debug!("Reflection for '{shader_name}' not readable: {e}");
                return false;
            }
        };
        let Some(fields) = reflection.get("shaderParams").and_then(Value::as_object) else {
            debug!("Compiled shader '{shader_name}' has no parameters");
            return false;
        };
        let user = match self.read_user_doc(shader_name) {
            Ok(user) => user,
            Err(e) => {
                warn!("Shader params for '{shader_name}' not loaded: {e}");
                return false;
            }
        };
        let user_fields = user
            .as_ref()
            .and_then(|doc| doc.get(SHADER_PARAMS_KEY))
            .and_then(Value::as_object);

        let mut loaded = Vec::new();
        for (name, value) in fields {
            if is_padding(name) {
                continue;
            }
            let kind = ScalarKind::from_reflection(value.get("type").and_then(Value::as_str).unwrap_or(""));
            let count = if kind == ScalarKind::Bool {
                1
            } else {
                value.get("elementCount").and_then(Value::as_u64).unwrap_or(1).max(1) as usize
            };
            let mut param = ShaderParam::new(name, kind, count);
            if let Some(entry) = user_fields.and_then(|f| f.get(name)) {
                param.apply_user(entry);
            }
            loaded.push(param);
        }
        if loaded.is_empty() {
            info!("No struct shader_params with parameters found in shader '{shader_name}'");
            return false;
        }

        let previous = self.params.remove(shader_name).unwrap_or_default();
        for param in &mut loaded {
            let reused = previous
                .iter()
                .find(|old| old.pool_index.is_some() && old.same_slot(param))
                .and_then(|old| old.pool_index)
                .or_else(|| self.find_equivalent_slot(param));
            if reused.is_some() {
                param.pool_index = reused;
                param.pending_value = None;
            }
            if allocate {
                ensure_slot(&mut self.pool, param);
            }
        }
        self.params.insert(shader_name.to_string(), loaded);
        self.release_unreferenced(&previous);
        self.process_pending_array(shader_name);
        true
    }

    fn find_equivalent_slot(&self, param: &ShaderParam) -> Option<usize> {
        self.params
            .values()
            .flatten()
            .find(|existing| existing.pool_index.is_some() && existing.same_slot(param))
            .and_then(|existing| existing.pool_index)
    }

    fn release_unreferenced(&mut self, previous: &[ShaderParam]) {
        for index in previous.iter().filter_map(|p| p.pool_index) {
            let referenced = self
                .params
                .values()
                .flatten()
                .any(|p| p.pool_index == Some(index));
            if referenced {
                continue;
            }
            if let Some(slot) = self.pool.get_mut(index) {
                slot.clear();
                slot.shrink_to_fit();
            }
        }
    }

    fn process_pending_array(&mut self, shader_name: &str) {
        if let Some(bytes) = self.pending_arrays.remove(shader_name) {
            debug!("Applying queued parameters for '{shader_name}'");
            self.gather(shader_name, &bytes);
        }
    }

    /// Copies a packed blob into the field slots, in field order, stopping when the blob runs
    /// out.
    fn gather(&mut self, shader_name: &str, src: &[u8]) {
        let Self { pool, params, .. } = self;
        let Some(list) = params.get_mut(shader_name) else {
            return;
        };
        let mut offset = 0;
        for param in list.iter_mut() {
            let remaining = src.len() - offset;
            if remaining == 0 {
                break;
            }
            let index = ensure_slot(pool, param);
            let size = param.size();
            let to_copy = size.min(remaining);
            pool[index][..to_copy].copy_from_slice(&src[offset..offset + to_copy]);
            offset += to_copy;
            if to_copy < size {
                break;
            }
        }
        if offset > CONSTANT_BUFFER_MAX_SIZE {
            warn!("Shader params size {offset} exceeds constant buffer maximum {CONSTANT_BUFFER_MAX_SIZE}");
        }
    }

    /// Writes a packed parameter blob into the store. Queued and replayed on the next
    /// successful load when the shader's parameters are not loaded yet.
    pub fn set_bytes_for(&mut self, shader_name: &str, src: &[u8]) {
        if !self.load(shader_name, false) {
            debug!("Queueing parameters for '{shader_name}' until its schema loads");
            self.pending_arrays.insert(shader_name.to_string(), src.to_vec());
            return;
        }
        self.pending_arrays.remove(shader_name);
        self.gather(shader_name, src);
    }

    /// Packs every field into a blob of `max_size` bytes. Fields that do not fit are skipped.
    pub fn packed_bytes(&mut self, shader_name: &str, max_size: usize) -> Option<Vec<u8>> {
        if !self.load(shader_name, false) {
            return None;
        }
        let Self { pool, params, .. } = self;
        let list = params.get_mut(shader_name)?;
        let mut out = vec![0u8; max_size];
        let mut offset = 0;
        for param in list.iter_mut() {
            let index = ensure_slot(pool, param);
            let size = param.size();
            if offset + size <= max_size {
                out[offset..offset + size].copy_from_slice(&pool[index]);
            }
            offset += size;
        }
        if offset > max_size {
            warn!("Shader params for '{shader_name}' need {offset} bytes, constant buffer holds {max_size}");
        }
        Some(out)
    }

    /// Constant-buffer sized array holding the shader's current parameter values.
    pub fn get_bytes_for(&mut self, shader_name: &str, compute: &dyn Compute) -> Option<ComputeArray> {
        let max_size = compute.constant_buffer_max_size();
        let bytes = self.packed_bytes(shader_name, max_size)?;
        Some(ComputeArray::from_bytes(1, max_size, &bytes))
    }

    /// Packed layout of the shader's fields, with the current values as defaults.
    pub fn descriptor(&mut self, shader_name: &str) -> Option<ReflectType> {
        if !self.load(shader_name, false) {
            return None;
        }
        let Self { pool, params, .. } = self;
        let list = params.get_mut(shader_name)?;
        let mut ty = ReflectType::new(shader_name);
        for param in list.iter_mut() {
            let index = ensure_slot(pool, param);
            ty = ty.with_field(param.name.clone(), param.kind, param.element_count, &pool[index]);
        }
        Some(ty)
    }

    pub fn value(&mut self, shader_name: &str, field: &str) -> Option<Vec<u8>> {
        if !self.load(shader_name, false) {
            return None;
        }
        let Self { pool, params, .. } = self;
        let param = params.get_mut(shader_name)?.iter_mut().find(|p| p.name == field)?;
        let index = ensure_slot(pool, param);
        Some(pool[index].clone())
    }

    /// Writes a GUI edit through to the field's pool slot. Extra bytes are ignored.
    pub fn apply_edit(&mut self, shader_name: &str, field: &str, bytes: &[u8]) -> bool {
        if !self.load(shader_name, false) {
            return false;
        }
        let Self { pool, params, .. } = self;
        let Some(param) = params
            .get_mut(shader_name)
            .and_then(|list| list.iter_mut().find(|p| p.name == field))
        else {
            return false;
        };
        let index = ensure_slot(pool, param);
        let slot = &mut pool[index];
        let len = bytes.len().min(slot.len());
        slot[..len].copy_from_slice(&bytes[..len]);
        true
    }

    /// Writes a default user file generated from the compiled reflection. An existing file is
    /// left alone and `Ok(false)` is returned.
    pub fn create(&self, shader_name: &str) -> Result<bool> {
        let path = self.config.user_params_path(shader_name);
        if path.exists() {
            info!("Shader params file '{}' already exists", path.display());
            return Ok(false);
        }

        let mut entries = Map::new();
        let reflection = read_json(&self.config.reflection_path(shader_name)).ok();
        if let Some(fields) = reflection
            .as_ref()
            .and_then(|doc| doc.get("shaderParams"))
            .and_then(Value::as_object)
        {
            for (name, value) in fields {
                if is_padding(name) {
                    continue;
                }
                let entry = if value.get("type").and_then(Value::as_str) == Some("bool") {
                    json!({ "value": false })
                } else {
                    let count = value.get("elementCount").and_then(Value::as_u64).unwrap_or(1);
                    let default = if count > 1 {
                        Value::Array(vec![json!(0); count as usize])
                    } else {
                        json!(0)
                    };
                    json!({
                        "value": default,
                        "min": 0,
                        "max": 1,
                        "step": 0.01,
                        "useSlider": false,
                        "isBool": false,
                        "hidden": false,
                    })
                };
                entries.insert(name.clone(), entry);
            }
        }

        let mut doc = Map::new();
        doc.insert(SHADER_PARAMS_KEY.to_string(), Value::Object(entries));
        write_doc(&path, &Value::Object(doc))?;
        info!("Shader params file '{}' created", path.display());
        Ok(true)
    }

    /// Writes an empty group document unless one exists.
    pub fn create_group(&self, group_name: &str) -> Result<bool> {
        let path = self.config.user_params_path(group_name);
        if path.exists() {
            info!("Group params file '{}' already exists", path.display());
            return Ok(false);
        }
        write_doc(&path, &json!({ SHADER_PARAMS_KEY: [] }))?;
        info!("Group params file '{}' created", path.display());
        Ok(true)
    }

    /// Loads every shader named by a group document. Fields are listed once per pool slot.
    pub fn load_group(&mut self, group_name: &str, reload: bool) -> bool {
        if !reload && self.groups.contains_key(group_name) {
            return true;
        }
        let doc = match self.read_user_doc(group_name) {
            Ok(Some(doc)) => doc,
            Ok(None) => return false,
            Err(e) => {
                warn!("Group '{group_name}' not loaded: {e}");
                return false;
            }
        };
        let shaders: Vec<String> = doc
            .get(SHADER_PARAMS_KEY)
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(|n| n.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let mut entries = BTreeMap::new();
        for shader in shaders {
            if !self.load_impl(&shader, false, true) {
                return false;
            }
            let Self { pool, params, .. } = self;
            if let Some(list) = params.get_mut(&shader) {
                for (position, param) in list.iter_mut().enumerate() {
                    let index = ensure_slot(pool, param);
                    entries.entry(index).or_insert_with(|| (shader.clone(), position));
                }
            }
        }
        self.groups.insert(group_name.to_string(), entries);
        true
    }

    fn widget(&mut self, shader_name: &str, position: usize) -> Option<Widget> {
        let Self { pool, params, .. } = self;
        let param = params.get_mut(shader_name)?.get_mut(position)?;
        if is_padding(&param.name) || param.hidden {
            return None;
        }
        let index = ensure_slot(pool, param);
        let kind = if param.kind == ScalarKind::Bool {
            WidgetKind::Checkbox
        } else if param.element_count == 16 {
            WidgetKind::Matrix4
        } else if param.is_bool {
            if param.element_count != 1 {
                debug!("Checkbox arrays are not supported for '{}'", param.name);
                return None;
            }
            WidgetKind::Checkbox
        } else if param.use_slider {
            WidgetKind::Slider
        } else {
            WidgetKind::Drag
        };
        Some(Widget {
            label: format!("{}##{shader_name}", param.name),
            shader: shader_name.to_string(),
            field: param.name.clone(),
            kind,
            scalar: param.kind,
            element_count: param.element_count,
            value: pool[index].clone(),
            min: param.min.clone(),
            max: param.max.clone(),
            step: param.step,
        })
    }

    /// Widget snapshot for every visible field of a shader.
    pub fn render(&mut self, shader_name: &str) -> Vec<Widget> {
        if !self.load(shader_name, false) {
            return Vec::new();
        }
        let count = self.params.get(shader_name).map_or(0, Vec::len);
        (0..count).filter_map(|i| self.widget(shader_name, i)).collect()
    }

    pub fn render_group(&mut self, group_name: &str) -> Vec<Widget> {
        if !self.load_group(group_name, false) {
            return Vec::new();
        }
        let entries: Vec<(String, usize)> = self
            .groups
            .get(group_name)
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default();
        entries
            .into_iter()
            .filter_map(|(shader, position)| self.widget(&shader, position))
            .collect()
    }
}

fn write_doc(path: &Path, doc: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut text = serde_json::to_string_pretty(doc)?;
    text.push('\n');
    fs::write(path, text)?;
    Ok(())
}
