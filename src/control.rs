//! RFC-822 style paragraph reader.
//!
//! Release files, Packages indices, and the suite configuration all share
//! the same surface syntax: paragraphs separated by blank lines, each a
//! sequence of `Name: value` fields where continuation lines start with
//! whitespace. Field names are matched case-insensitively and field order
//! within a paragraph is preserved.

use std::fs;

use camino::Utf8Path;

use crate::error::DebstrapError;

/// A single `Name: value` field. Continuation lines are folded into
/// `value` joined by `\n`, with their leading whitespace stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
}

/// One paragraph of an RFC-822 style file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paragraph {
    fields: Vec<Field>,
}

impl Paragraph {
    /// Looks up a field value by case-insensitive name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Parses a whole file into its paragraphs.
///
/// `what` names the artifact for error messages ("Release", "suites", …).
pub fn parse_str(what: &str, text: &str) -> Result<Vec<Paragraph>, DebstrapError> {
    let mut paragraphs = Vec::new();
    let mut current = Paragraph::default();

    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            let Some(last) = current.fields.last_mut() else {
                return Err(DebstrapError::parse(
                    what,
                    format!("line {}: continuation without a field", lineno + 1),
                ));
            };
            if !last.value.is_empty() {
                last.value.push('\n');
            }
            last.value.push_str(line.trim_start());
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(DebstrapError::parse(
                what,
                format!("line {}: expected `Name: value`", lineno + 1),
            ));
        };
        current.fields.push(Field {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
        });
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs)
}

/// Reads and parses an RFC-822 style file from disk.
pub fn read_file(what: &str, path: &Utf8Path) -> Result<Vec<Paragraph>, DebstrapError> {
    let text =
        fs::read_to_string(path).map_err(|e| DebstrapError::io(path.to_string(), e))?;
    parse_str(what, &text)
}

/// Splits a whitespace/comma delimited list field into its entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split([' ', '\t', '\n', ','])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
