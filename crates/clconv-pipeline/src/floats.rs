// SPDX-License-Identifier: AGPL-3.0-only

//! Delimited float text
//!
//! Weight files and bulk inputs hold one value per line; request payloads
//! are comma separated. Empty segments are skipped and whitespace around a
//! value is ignored.

use crate::error::{PipelineError, Result};
use std::fmt::Write as _;
use std::path::Path;

/// Parse `text` as floats separated by `delimiter`
///
/// # Errors
///
/// Returns `Parse` for the first segment that is not a decimal float.
pub fn parse_floats(text: &str, delimiter: char) -> Result<Vec<f32>> {
    text.split(delimiter)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .enumerate()
        .map(|(index, segment)| {
            segment.parse::<f32>().map_err(|_| PipelineError::Parse {
                index,
                value: segment.to_string(),
            })
        })
        .collect()
}

/// Read a file of floats separated by `delimiter`
///
/// # Errors
///
/// Returns `FloatFile` if the file cannot be read, `Parse` on bad values.
pub fn floats_from_file(path: impl AsRef<Path>, delimiter: char) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| PipelineError::FloatFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_floats(&text, delimiter)
}

/// Write one value per line in shortest round-trip decimal form
///
/// # Errors
///
/// Returns `FloatFile` if the file cannot be written.
pub fn floats_to_file(path: impl AsRef<Path>, values: &[f32]) -> Result<()> {
    let path = path.as_ref();
    let mut text = String::with_capacity(values.len() * 12);
    for value in values {
        let _ = writeln!(text, "{value}");
    }
    std::fs::write(path, text).map_err(|source| PipelineError::FloatFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Comma-joined scientific notation, as returned by the serving endpoint
pub fn to_scientific_csv(values: &[f32]) -> String {
    values
        .iter()
        .map(|v| format!("{v:e}"))
        .collect::<Vec<_>>()
        .join(",")
}
