//! Typed values stored in datasets and attributes.

use serde::{Deserialize, Serialize};

/// A dataset or attribute value.
///
/// Arrays keep their element type even when empty, so an empty list of names
/// stays text-typed instead of collapsing to a numeric empty array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "data", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    TextArray(Vec<String>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn texts<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::TextArray(items.into_iter().map(Into::into).collect())
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            Value::IntArray(_) | Value::FloatArray(_) | Value::TextArray(_)
        )
    }

    /// Number of elements; scalars count as one.
    pub fn len(&self) -> usize {
        match self {
            Value::IntArray(v) => v.len(),
            Value::FloatArray(v) => v.len(),
            Value::TextArray(v) => v.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::IntArray(_) => "int",
            Value::Float(_) | Value::FloatArray(_) => "float",
            Value::Text(_) | Value::TextArray(_) => "text",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Element-wise text rendering of a list (or a one-element list for a scalar).
    pub fn to_text_list(&self) -> Vec<String> {
        match self {
            Value::TextArray(v) => v.clone(),
            Value::IntArray(v) => v.iter().map(i64::to_string).collect(),
            Value::FloatArray(v) => v.iter().map(f64::to_string).collect(),
            Value::Text(s) => vec![s.clone()],
            Value::Int(i) => vec![i.to_string()],
            Value::Float(f) => vec![f.to_string()],
            Value::Bool(b) => vec![b.to_string()],
        }
    }

    /// Equality used when comparing computed against stored content.
    ///
    /// NaN equals NaN, integers compare equal to floats of the same value, and
    /// values of different shape are simply unequal.
    pub fn same_as(&self, other: &Value) -> bool {
        fn feq(a: f64, b: f64) -> bool {
            (a.is_nan() && b.is_nan()) || a == b
        }
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => feq(*a, *b),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                feq(*a as f64, *b)
            }
            (Value::FloatArray(a), Value::FloatArray(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| feq(*x, *y))
            }
            (Value::IntArray(a), Value::FloatArray(b))
            | (Value::FloatArray(b), Value::IntArray(a)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| feq(*x as f64, *y))
            }
            // A one-element text list and the bare string are the same content.
            (Value::Text(a), Value::TextArray(b)) | (Value::TextArray(b), Value::Text(a)) => {
                b.len() == 1 && b[0] == *a
            }
            (a, b) => a == b,
        }
    }

    /// Convert a JSON literal (as written in a spec file) into a value.
    ///
    /// Returns `None` for objects, nulls and heterogeneous arrays. Empty arrays
    /// become text arrays.
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        use serde_json::Value as J;
        match json {
            J::Bool(b) => Some(Value::Bool(*b)),
            J::Number(n) => match n.as_i64() {
                Some(i) => Some(Value::Int(i)),
                None => n.as_f64().map(Value::Float),
            },
            J::String(s) => Some(Value::Text(s.clone())),
            J::Array(items) => {
                if items.iter().all(J::is_string) {
                    Some(Value::TextArray(
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect(),
                    ))
                } else if items.iter().all(|v| v.as_i64().is_some()) {
                    Some(Value::IntArray(items.iter().filter_map(J::as_i64).collect()))
                } else if items.iter().all(J::is_number) {
                    Some(Value::FloatArray(items.iter().filter_map(J::as_f64).collect()))
                } else {
                    None
                }
            }
            J::Null | J::Object(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::IntArray(v) => write!(f, "{v:?}"),
            Value::FloatArray(v) => write!(f, "{v:?}"),
            Value::TextArray(v) => write!(f, "{v:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nan_equals_nan() {
        let a = Value::FloatArray(vec![1.0, f64::NAN]);
        let b = Value::FloatArray(vec![1.0, f64::NAN]);
        assert!(a.same_as(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn shape_mismatch_is_unequal() {
        let a = Value::IntArray(vec![1, 2]);
        let b = Value::IntArray(vec![1, 2, 3]);
        assert!(!a.same_as(&b));
        assert!(!a.same_as(&Value::Int(1)));
    }

    #[test]
    fn json_literals() {
        assert_eq!(
            Value::from_json(&json!(["a", "b"])),
            Some(Value::texts(["a", "b"]))
        );
        assert_eq!(Value::from_json(&json!([1, 2])), Some(Value::IntArray(vec![1, 2])));
        assert_eq!(
            Value::from_json(&json!([1, 2.5])),
            Some(Value::FloatArray(vec![1.0, 2.5]))
        );
        assert_eq!(Value::from_json(&json!([])), Some(Value::TextArray(vec![])));
        assert_eq!(Value::from_json(&json!({"a": 1})), None);
    }

    #[test]
    fn empty_text_array_keeps_dtype_in_snapshot() {
        let text = serde_json::to_string(&Value::TextArray(vec![])).unwrap();
        assert_eq!(text, r#"{"dtype":"text_array","data":[]}"#);
    }
}
