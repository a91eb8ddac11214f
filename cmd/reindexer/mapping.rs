use std::path::Path;

use eyre::{Result, WrapErr, bail, eyre};
use serde_json::{Map, Value};

/// Loads the target mapping from `path`.
///
/// The mapping is the first non-empty line of the file, parsed as JSON. Files
/// holding a pretty-printed document are accepted too. With `mapping_type`
/// the mapping is wrapped as `{ "<type>": <mapping> }`.
pub fn load_mapping(path: &Path, mapping_type: Option<&str>) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Cannot read mapping file {path:?}"))?;
    parse_mapping(&contents, mapping_type)
        .wrap_err_with(|| format!("Invalid mapping file {path:?}"))
}

pub fn parse_mapping(contents: &str, mapping_type: Option<&str>) -> Result<Value> {
    let first_line = contents
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| eyre!("mapping file is empty"))?;

    let mapping: Value = match serde_json::from_str(first_line) {
        Ok(mapping) => mapping,
        Err(line_error) => serde_json::from_str(contents.trim())
            .map_err(|_| line_error)
            .wrap_err("mapping is not valid JSON")?,
    };
    if !mapping.is_object() {
        bail!("mapping must be a JSON object");
    }

    Ok(match mapping_type {
        Some(mapping_type) => {
            let mut wrapped = Map::new();
            wrapped.insert(mapping_type.to_owned(), mapping);
            Value::Object(wrapped)
        }
        None => mapping,
    })
}
