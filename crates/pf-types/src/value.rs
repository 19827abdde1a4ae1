use serde::{Deserialize, Serialize};

/// A tagged value read from the attribute store.
///
/// Every historical read yields one of these; callers narrow by attribute
/// name (`close` is floating-point, listing flags may be integers, and so
/// on). Integers widen to floats on request, text never does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Parse free-form text the way ingestion drivers do: integer first,
    /// then float, then the raw text.
    pub fn parse(raw: &str) -> AttributeValue {
        let trimmed = raw.trim();
        if let Ok(v) = trimmed.parse::<i64>() {
            return AttributeValue::Int(v);
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            return AttributeValue::Float(v);
        }
        AttributeValue::Text(trimmed.to_string())
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Text(v.to_string())
    }
}
