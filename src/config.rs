use std::io::Write;
use std::path::Path;
use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};

/// The persisted configuration document: an ordered mapping of string keys to
/// scalar values. `serde_json` is built with `preserve_order`, so key order
/// survives load/merge/save round trips.
pub type ConfigDoc = Map<String, Value>;

/// Loads the configuration document at `path`.
///
/// Returns `Ok(None)` when no store exists yet. A store that exists but fails
/// to parse is an error: the document may have been edited by the user, and
/// silently discarding it on the next write is unacceptable.
pub fn load(path: &Path) -> Result<Option<ConfigDoc>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not read config store '{}'", path.display()))?;
    let doc: Value = serde_json::from_str(&text).with_context(|| {
        format!(
            "config store '{}' exists but is not valid JSON; fix or remove it and re-run the installer",
            path.display()
        )
    })?;
    match doc {
        Value::Object(map) => Ok(Some(map)),
        _ => bail!("config store '{}' is not a JSON object", path.display()),
    }
}

/// Sets (or removes) one key and persists the merged document.
///
/// Existing keys that are not being set are preserved verbatim. A value of
/// `"true"`/`"false"` is coerced to a boolean. `None` removes the key instead
/// of storing a null. The store and its parent directory are created on first
/// use; the document is always rewritten atomically as a whole.
pub fn set_key(path: &Path, key: &str, value: Option<&str>) -> Result<ConfigDoc> {
    let mut doc = load(path)?.unwrap_or_default();
    match value {
        None => {
            doc.remove(key);
        }
        Some(value) => {
            doc.insert(key.to_string(), coerce_scalar(value));
        }
    }
    write_document(path, &doc)?;
    Ok(doc)
}

fn coerce_scalar(value: &str) -> Value {
    match value {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        other => Value::String(other.to_string()),
    }
}

fn write_document(path: &Path, doc: &ConfigDoc) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config store '{}' has no parent directory", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("could not create config home '{}'", parent.display()))?;
    // Write-then-rename keeps the previous document intact if anything fails
    // mid-write.
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("could not create a temp file under '{}'", parent.display()))?;
    serde_json::to_writer_pretty(&mut tmp, doc)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("could not replace config store '{}'", path.display()))?;
    Ok(())
}
