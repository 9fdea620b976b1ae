//! Typed observations produced by source adapters
//!
//! A `Signal` is one source's observation about one field. The union is closed:
//! consumers match exhaustively instead of probing an open key/value map.
//!
//! Wire shape (JSON):
//! - `{"type":"numeric","value":0-100,"rawValue":..,"scale":..}`
//! - `{"type":"boolean","value":true}`
//! - `{"type":"categorical","value":"..","allowedValues":[..]}`
//! - `{"type":"bucket","value":"..","numericEquivalent":0-100}`

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Upper bound of the normalized numeric range
pub const NORMALIZED_MAX: f64 = 100.0;

/// One typed observation from one source about one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signal {
    /// Numeric value normalized to 0-100, with the raw value and its scale
    Numeric {
        value: f64,
        #[serde(rename = "rawValue")]
        raw_value: f64,
        scale: f64,
    },
    /// Yes/no observation
    Boolean { value: bool },
    /// One value out of a closed set
    Categorical {
        value: String,
        #[serde(rename = "allowedValues")]
        allowed_values: Vec<String>,
    },
    /// Ordinal label with a 0-100 numeric equivalent
    Bucket {
        value: String,
        #[serde(rename = "numericEquivalent")]
        numeric_equivalent: f64,
    },
}

/// Discriminant of a `Signal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Numeric,
    Boolean,
    Categorical,
    Bucket,
}

impl Signal {
    /// Build a numeric signal from a raw value on `0..=scale`
    ///
    /// The normalized value is clamped to 0-100.
    pub fn numeric(raw_value: f64, scale: f64) -> Result<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::InvalidInput(format!(
                "Numeric signal scale must be positive, got {}",
                scale
            )));
        }
        if !raw_value.is_finite() {
            return Err(Error::InvalidInput("Numeric signal value is not finite".into()));
        }
        let value = (raw_value / scale * NORMALIZED_MAX).clamp(0.0, NORMALIZED_MAX);
        Ok(Self::Numeric {
            value,
            raw_value,
            scale,
        })
    }

    pub fn boolean(value: bool) -> Self {
        Self::Boolean { value }
    }

    /// Build a categorical signal; `value` must be in `allowed_values` when the set is non-empty
    pub fn categorical(value: impl Into<String>, allowed_values: Vec<String>) -> Result<Self> {
        let value = value.into();
        if !allowed_values.is_empty() && !allowed_values.iter().any(|a| a == &value) {
            return Err(Error::InvalidInput(format!(
                "Categorical value '{}' not in allowed set",
                value
            )));
        }
        Ok(Self::Categorical {
            value,
            allowed_values,
        })
    }

    pub fn bucket(value: impl Into<String>, numeric_equivalent: f64) -> Self {
        Self::Bucket {
            value: value.into(),
            numeric_equivalent: numeric_equivalent.clamp(0.0, NORMALIZED_MAX),
        }
    }

    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Numeric { .. } => SignalKind::Numeric,
            Self::Boolean { .. } => SignalKind::Boolean,
            Self::Categorical { .. } => SignalKind::Categorical,
            Self::Bucket { .. } => SignalKind::Bucket,
        }
    }

    /// Normalized 0-100 value of a numeric signal
    pub fn normalized(&self) -> Option<f64> {
        match self {
            Self::Numeric { value, .. } => Some(*value),
            Self::Boolean { .. } | Self::Categorical { .. } | Self::Bucket { .. } => None,
        }
    }

    /// Label of a categorical or bucket signal
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Categorical { value, .. } | Self::Bucket { value, .. } => Some(value.as_str()),
            Self::Numeric { .. } | Self::Boolean { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_normalization() {
        let s = Signal::numeric(7.5, 10.0).unwrap();
        assert_eq!(s.normalized(), Some(75.0));
        assert_eq!(s.kind(), SignalKind::Numeric);

        let clamped = Signal::numeric(12.0, 10.0).unwrap();
        assert_eq!(clamped.normalized(), Some(100.0));
    }

    #[test]
    fn test_numeric_rejects_bad_scale() {
        assert!(Signal::numeric(5.0, 0.0).is_err());
        assert!(Signal::numeric(5.0, -10.0).is_err());
        assert!(Signal::numeric(f64::NAN, 10.0).is_err());
    }

    #[test]
    fn test_categorical_membership() {
        let allowed = vec!["U".to_string(), "U/A".to_string(), "A".to_string()];
        assert!(Signal::categorical("A", allowed.clone()).is_ok());
        assert!(Signal::categorical("R", allowed).is_err());
        // Open set
        assert!(Signal::categorical("anything", Vec::new()).is_ok());
    }

    #[test]
    fn test_wire_shape() {
        let v = serde_json::to_value(Signal::numeric(80.0, 100.0).unwrap()).unwrap();
        assert_eq!(v["type"], json!("numeric"));
        assert_eq!(v["rawValue"], json!(80.0));
        assert_eq!(v["scale"], json!(100.0));

        let b: Signal = serde_json::from_value(json!({
            "type": "bucket",
            "value": "fresh",
            "numericEquivalent": 70.0
        }))
        .unwrap();
        assert_eq!(b.label(), Some("fresh"));
        assert_eq!(b.normalized(), None);
    }
}
