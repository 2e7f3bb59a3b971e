use std::fmt;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffKind {
    Missing { expected: Value },
    Unexpected { actual: Value },
    ValueMismatch { expected: Value, actual: Value },
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffEntry {
    /// `$`-rooted path such as `$["pre-policy"]["update"]["10.0.0.0/24"]`.
    pub path: String,
    #[serde(flatten)]
    pub kind: DiffKind,
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DiffKind::Missing { expected } => {
                write!(f, "{}: missing in actual, expected {expected}", self.path)
            }
            DiffKind::Unexpected { actual } => {
                write!(f, "{}: unexpected in actual: {actual}", self.path)
            }
            DiffKind::ValueMismatch { expected, actual } => {
                write!(f, "{}: actual={actual}, expected={expected}", self.path)
            }
            DiffKind::LengthMismatch { expected, actual } => write!(
                f,
                "{}: array length mismatch: actual={actual}, expected={expected}",
                self.path
            ),
        }
    }
}

/// Structured result of a failed exact comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JsonDiff {
    entries: Vec<DiffEntry>,
}

impl JsonDiff {
    #[must_use]
    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for JsonDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, entry) in self.entries.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// Exact structural comparison of `actual` against `expected`.
///
/// Object keys must match in both directions, arrays must match in length
/// and order, and scalars must be identical with no numeric or string
/// coercion. An expected `null` accepts a key that is absent or null.
/// Returns `None` when the documents match.
#[must_use]
pub fn json_cmp_exact(actual: &Value, expected: &Value) -> Option<JsonDiff> {
    let mut entries = Vec::new();
    walk(actual, expected, "$", &mut entries);
    (!entries.is_empty()).then_some(JsonDiff { entries })
}

fn walk(actual: &Value, expected: &Value, path: &str, out: &mut Vec<DiffEntry>) {
    match (actual, expected) {
        (Value::Object(actual_map), Value::Object(expected_map)) => {
            for (key, expected_value) in expected_map {
                let child = format!("{path}[{key:?}]");
                match actual_map.get(key) {
                    Some(actual_value) => walk(actual_value, expected_value, &child, out),
                    None if expected_value.is_null() => {}
                    None => out.push(DiffEntry {
                        path: child,
                        kind: DiffKind::Missing {
                            expected: expected_value.clone(),
                        },
                    }),
                }
            }
            for (key, actual_value) in actual_map {
                if !expected_map.contains_key(key) {
                    out.push(DiffEntry {
                        path: format!("{path}[{key:?}]"),
                        kind: DiffKind::Unexpected {
                            actual: actual_value.clone(),
                        },
                    });
                }
            }
        }
        (Value::Array(actual_items), Value::Array(expected_items)) => {
            if actual_items.len() != expected_items.len() {
                out.push(DiffEntry {
                    path: path.to_owned(),
                    kind: DiffKind::LengthMismatch {
                        expected: expected_items.len(),
                        actual: actual_items.len(),
                    },
                });
                return;
            }
            for (idx, (actual_item, expected_item)) in
                actual_items.iter().zip(expected_items).enumerate()
            {
                walk(actual_item, expected_item, &format!("{path}[{idx}]"), out);
            }
        }
        _ if actual == expected => {}
        _ => out.push(DiffEntry {
            path: path.to_owned(),
            kind: DiffKind::ValueMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            },
        }),
    }
}
