use serde_json::Value;
use std::fs;
use std::path::Path;

pub const TAG_REF_PREFIX: &str = "refs/tags/";

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("version must not be empty")]
    EmptyVersion,

    #[error("descriptor not found at {0}")]
    Missing(String),

    #[error("failed to read descriptor {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("descriptor {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("descriptor {0} must be a JSON object at the top level")]
    NotAnObject(String),
}

/// `refs/tags/v1.2.3` -> `v1.2.3`; anything else is trimmed and kept.
pub fn normalize_version(raw: &str) -> Result<String, DescriptorError> {
    let v = raw.trim();
    let v = v.strip_prefix(TAG_REF_PREFIX).unwrap_or(v).trim();
    if v.is_empty() {
        return Err(DescriptorError::EmptyVersion);
    }
    Ok(v.to_string())
}

/// Set the version field(s) of a descriptor document, keeping everything else.
///
/// With `cascade` every action's `version` is stamped too; otherwise nested
/// versions are left exactly as they are.
pub fn stamp_value(doc: &mut Value, version: &str, cascade: bool) -> bool {
    let Some(obj) = doc.as_object_mut() else {
        return false;
    };
    obj.insert("version".to_string(), Value::String(version.to_string()));

    if cascade {
        if let Some(Value::Array(actions)) = obj.get_mut("actions") {
            for action in actions.iter_mut().filter_map(Value::as_object_mut) {
                action.insert("version".to_string(), Value::String(version.to_string()));
            }
        }
    }
    true
}

/// Rewrite the descriptor at `path` in place with the given version.
pub fn stamp_file(path: &Path, raw_version: &str, cascade: bool) -> Result<String, DescriptorError> {
    let version = normalize_version(raw_version)?;
    let shown = path.display().to_string();

    if !path.exists() {
        return Err(DescriptorError::Missing(shown));
    }
    let text = fs::read_to_string(path).map_err(|source| DescriptorError::Io {
        path: shown.clone(),
        source,
    })?;
    let mut doc: Value = serde_json::from_str(&text).map_err(|source| DescriptorError::Parse {
        path: shown.clone(),
        source,
    })?;

    if !stamp_value(&mut doc, &version, cascade) {
        return Err(DescriptorError::NotAnObject(shown));
    }

    let out = render_pretty(&doc).map_err(|source| DescriptorError::Parse {
        path: shown.clone(),
        source,
    })?;
    if out != text {
        fs::write(path, out).map_err(|source| DescriptorError::Io { path: shown, source })?;
    }
    tracing::info!(version = %version, cascade, "descriptor version stamped");
    Ok(version)
}

pub fn render_pretty(doc: &Value) -> Result<String, serde_json::Error> {
    let mut out = serde_json::to_string_pretty(doc)?;
    out.push('\n');
    Ok(out)
}
