use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::{CompiledShader, CompilerSettings, ComputeError, Result, ShaderCompiler, reflection_path};

/// Name of the uniform struct whose fields are reflected into the parameter document.
pub const SHADER_PARAMS_STRUCT: &str = "shader_params";

/// Syntax-checking compiler for the CPU backend.
///
/// It does not generate code. It validates that the source is well formed, that the entry
/// point exists, and emits the reflection document for the `shader_params` struct.
#[derive(Debug, Default)]
pub struct CpuCompiler {
    attempts: AtomicUsize,
}

impl CpuCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times [`ShaderCompiler::compile`] has been invoked.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("//") {
            rest = after.find('\n').map_or("", |i| &after[i..]);
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |i| &after[i + 2..]);
            out.push(' ');
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }
    }
    out
}

fn check_balanced(source: &str) -> std::result::Result<(), String> {
    let mut stack = Vec::new();
    for (line, text) in source.lines().enumerate() {
        for c in text.chars() {
            match c {
                '{' | '(' | '[' => stack.push((c, line + 1)),
                '}' | ')' | ']' => {
                    let expected = match c {
                        '}' => '{',
                        ')' => '(',
                        _ => '[',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        _ => return Err(format!("line {}: unexpected '{c}'", line + 1)),
                    }
                }
                _ => {}
            }
        }
    }
    match stack.pop() {
        Some((open, line)) => Err(format!("line {line}: unclosed '{open}'")),
        None => Ok(()),
    }
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn has_entry_point(source: &str, entry: &str) -> bool {
    source.match_indices(entry).any(|(start, _)| {
        let before_ok = source[..start].chars().next_back().is_none_or(|c| !is_ident(c));
        let after = source[start + entry.len()..].trim_start();
        before_ok && after.starts_with('(')
    })
}

/// Maps a shader type spelling to the reflected scalar type and its element count.
fn scalar_and_count(ty: &str) -> Option<(&'static str, usize)> {
    const SCALARS: [(&str, &str); 10] = [
        ("uint64_t", "uint64"),
        ("int64_t", "int64"),
        ("float16_t", "float16"),
        ("half", "float16"),
        ("double", "double"),
        ("float", "float"),
        ("uint", "uint"),
        ("int", "int"),
        ("bool", "bool"),
        ("void", "void"),
    ];
    let (prefix, name) = SCALARS.iter().find(|(prefix, _)| ty.starts_with(prefix))?;
    let dims = &ty[prefix.len()..];
    let count = if dims.is_empty() {
        1
    } else if let Some((rows, cols)) = dims.split_once('x') {
        rows.parse::<usize>().ok()? * cols.parse::<usize>().ok()?
    } else {
        dims.parse().ok()?
    };
    Some((name, count))
}

fn struct_body<'a>(source: &'a str, name: &str) -> Option<&'a str> {
    let pattern = format!("struct {name}");
    let start = source.find(&pattern)? + pattern.len();
    let open = start + source[start..].find('{')?;
    let mut depth = 0usize;
    for (i, c) in source[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&source[open + 1..open + i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn reflect_shader_params(source: &str) -> std::result::Result<Map<String, Value>, String> {
    let mut fields = Map::new();
    let Some(body) = struct_body(source, SHADER_PARAMS_STRUCT) else {
        return Ok(fields);
    };
    for decl in body.split(';').map(str::trim).filter(|d| !d.is_empty()) {
        let mut parts = decl.split_whitespace();
        let (Some(ty), Some(rest)) = (parts.next(), parts.next()) else {
            return Err(format!("malformed field declaration '{decl}'"));
        };
        let (field, array_len) = match rest.split_once('[') {
            Some((field, len)) => {
                let len = len.trim_end_matches(']').parse::<usize>();
                (field, len.map_err(|_| format!("bad array length in '{decl}'"))?)
            }
            None => (rest, 1),
        };
        let (scalar, count) =
            scalar_and_count(ty).ok_or_else(|| format!("unknown type '{ty}' in '{decl}'"))?;
        fields.insert(
            field.to_string(),
            json!({ "type": scalar, "elementCount": count * array_len }),
        );
    }
    Ok(fields)
}

impl ShaderCompiler for CpuCompiler {
    fn compile(&self, shader_name: &str, settings: &CompilerSettings) -> Result<CompiledShader> {
        self.attempts.fetch_add(1, Ordering::AcqRel);
        let fail = |message: String| {
            warn!("Shader '{shader_name}' failed to compile: {message}");
            ComputeError::Compile {
                shader: shader_name.to_string(),
                message,
            }
        };

        let path = settings.shader_dir.join(shader_name);
        let source = fs::read_to_string(&path).map_err(|e| fail(format!("{}: {e}", path.display())))?;
        let source = strip_comments(&source);
        check_balanced(&source).map_err(fail)?;
        if !has_entry_point(&source, &settings.entry_point) {
            return Err(fail(format!("entry point '{}' not found", settings.entry_point)));
        }
        let fields = reflect_shader_params(&source).map_err(fail)?;

        let reflection = reflection_path(&settings.cache_dir, shader_name);
        if let Some(parent) = reflection.parent() {
            fs::create_dir_all(parent)?;
        }
        let doc = json!({ "shaderParams": Value::Object(fields) });
        fs::write(&reflection, serde_json::to_string_pretty(&doc)?)?;

        info!("Compiled shader '{shader_name}'");
        Ok(CompiledShader {
            shader_name: shader_name.to_string(),
            entry_point: settings.entry_point.clone(),
            reflection_path: reflection,
        })
    }
}
