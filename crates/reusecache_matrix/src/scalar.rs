use serde::{Deserialize, Serialize};

/// A scalar cache value. Scalars are never spilled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl ScalarValue {
    /// Approximate in-memory footprint in bytes.
    pub fn in_memory_size(&self) -> u64 {
        const OBJECT_OVERHEAD: u64 = 16;
        match self {
            ScalarValue::Bool(_) => OBJECT_OVERHEAD + 1,
            ScalarValue::Int(_) | ScalarValue::Double(_) => OBJECT_OVERHEAD + 8,
            ScalarValue::String(s) => OBJECT_OVERHEAD + 24 + s.len() as u64,
        }
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Double(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int(value)
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Bool(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::String(value.to_string())
    }
}
