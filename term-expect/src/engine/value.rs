//! Engine-independent cell values.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use datafusion::scalar::ScalarValue;
use serde::{Deserialize, Serialize};

/// A single value read from a query result or given as a threshold.
///
/// NULL and NaN are both treated as "no observation": [`MetricValue::as_f64`]
/// returns `None` for them and validators fail the check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Text(String),
}

impl MetricValue {
    /// Converts a DataFusion scalar, falling back to its textual form for
    /// types without a direct counterpart.
    pub fn from_scalar(value: &ScalarValue) -> Self {
        if value.is_null() {
            return MetricValue::Null;
        }
        match value {
            ScalarValue::Boolean(Some(v)) => MetricValue::Bool(*v),
            ScalarValue::Int8(Some(v)) => MetricValue::Int(i64::from(*v)),
            ScalarValue::Int16(Some(v)) => MetricValue::Int(i64::from(*v)),
            ScalarValue::Int32(Some(v)) => MetricValue::Int(i64::from(*v)),
            ScalarValue::Int64(Some(v)) => MetricValue::Int(*v),
            ScalarValue::UInt8(Some(v)) => MetricValue::Int(i64::from(*v)),
            ScalarValue::UInt16(Some(v)) => MetricValue::Int(i64::from(*v)),
            ScalarValue::UInt32(Some(v)) => MetricValue::Int(i64::from(*v)),
            ScalarValue::UInt64(Some(v)) => match i64::try_from(*v) {
                Ok(v) => MetricValue::Int(v),
                Err(_) => MetricValue::Float(*v as f64),
            },
            ScalarValue::Float32(Some(v)) => MetricValue::Float(f64::from(*v)),
            ScalarValue::Float64(Some(v)) => MetricValue::Float(*v),
            ScalarValue::Decimal128(Some(v), _, scale) => {
                MetricValue::Float(*v as f64 / 10f64.powi(i32::from(*scale)))
            }
            ScalarValue::Utf8(Some(s))
            | ScalarValue::LargeUtf8(Some(s))
            | ScalarValue::Utf8View(Some(s)) => MetricValue::Text(s.clone()),
            ScalarValue::Date32(Some(days)) => {
                DateTime::from_timestamp(i64::from(*days) * 86_400, 0)
                    .map(|dt| MetricValue::Date(dt.date_naive()))
                    .unwrap_or_else(|| MetricValue::Text(value.to_string()))
            }
            ScalarValue::Date64(Some(ms)) => DateTime::from_timestamp_millis(*ms)
                .map(|dt| MetricValue::Date(dt.date_naive()))
                .unwrap_or_else(|| MetricValue::Text(value.to_string())),
            ScalarValue::TimestampSecond(Some(v), _) => {
                timestamp(DateTime::from_timestamp(*v, 0), value)
            }
            ScalarValue::TimestampMillisecond(Some(v), _) => {
                timestamp(DateTime::from_timestamp_millis(*v), value)
            }
            ScalarValue::TimestampMicrosecond(Some(v), _) => {
                timestamp(DateTime::from_timestamp_micros(*v), value)
            }
            ScalarValue::TimestampNanosecond(Some(v), _) => {
                MetricValue::Timestamp(DateTime::from_timestamp_nanos(*v))
            }
            other => MetricValue::Text(other.to_string()),
        }
    }

    /// True for NULL and NaN.
    pub fn is_null(&self) -> bool {
        match self {
            MetricValue::Null => true,
            MetricValue::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Numeric view of the value; `None` for NULL, NaN and non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Int(v) => Some(*v as f64),
            MetricValue::Float(v) if !v.is_nan() => Some(*v),
            MetricValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Integral view of the value; floats are accepted when they hold a whole number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetricValue::Int(v) => Some(*v),
            MetricValue::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Point in time for temporal values; dates map to midnight UTC.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            MetricValue::Timestamp(ts) => Some(*ts),
            MetricValue::Date(d) => d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
            MetricValue::Text(s) => s
                .parse::<DateTime<Utc>>()
                .ok()
                .or_else(|| {
                    s.parse::<NaiveDate>()
                        .ok()
                        .and_then(|d| MetricValue::Date(d).as_timestamp())
                }),
            _ => None,
        }
    }

    /// Orders two values of compatible kinds. `None` when either side is NULL
    /// or the kinds cannot be compared.
    pub fn compare(&self, other: &MetricValue) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b);
        }
        match (self, other) {
            (MetricValue::Text(a), MetricValue::Text(b)) => Some(a.cmp(b)),
            _ => match (self.as_timestamp(), other.as_timestamp()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => None,
            },
        }
    }

    /// Value equality with numeric kinds compared by magnitude.
    pub fn same_as(&self, other: &MetricValue) -> bool {
        match (self, other) {
            (MetricValue::Null, MetricValue::Null) => true,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MetricValue::Float(v) if !v.is_finite() => serde_json::Value::Null,
            other => serde_json::to_value(other).unwrap_or(serde_json::Value::Null),
        }
    }
}

fn timestamp(parsed: Option<DateTime<Utc>>, original: &ScalarValue) -> MetricValue {
    parsed
        .map(MetricValue::Timestamp)
        .unwrap_or_else(|| MetricValue::Text(original.to_string()))
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Null => f.write_str("NULL"),
            MetricValue::Bool(v) => write!(f, "{v}"),
            MetricValue::Int(v) => write!(f, "{v}"),
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            MetricValue::Date(v) => write!(f, "{v}"),
            MetricValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Int(i64::from(v))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_scalar() {
        assert_eq!(
            MetricValue::from_scalar(&ScalarValue::Int32(Some(7))),
            MetricValue::Int(7)
        );
        assert_eq!(
            MetricValue::from_scalar(&ScalarValue::Float64(None)),
            MetricValue::Null
        );
        assert_eq!(
            MetricValue::from_scalar(&ScalarValue::Utf8(Some("x".into()))),
            MetricValue::Text("x".into())
        );
        assert_eq!(
            MetricValue::from_scalar(&ScalarValue::Date32(Some(1))),
            MetricValue::Date(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap())
        );
        assert_eq!(
            MetricValue::from_scalar(&ScalarValue::Decimal128(Some(1234), 10, 2)),
            MetricValue::Float(12.34)
        );
    }

    #[test]
    fn test_nan_is_null() {
        let nan = MetricValue::Float(f64::NAN);
        assert!(nan.is_null());
        assert_eq!(nan.as_f64(), None);
        assert_eq!(nan.compare(&MetricValue::Int(1)), None);
        assert_eq!(nan.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_compare_mixed_kinds() {
        assert_eq!(
            MetricValue::Int(2).compare(&MetricValue::Float(1.5)),
            Some(Ordering::Greater)
        );
        assert!(MetricValue::Int(3).same_as(&MetricValue::Float(3.0)));
        assert_eq!(
            MetricValue::Text("2024-01-02".into())
                .compare(&MetricValue::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())),
            Some(Ordering::Greater)
        );
        assert_eq!(MetricValue::Text("a".into()).compare(&MetricValue::Int(1)), None);
    }

    #[test]
    fn test_untagged_deserialization() {
        let values: Vec<MetricValue> =
            serde_json::from_str(r#"[null, true, 3, 2.5, "2024-05-01", "abc"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                MetricValue::Null,
                MetricValue::Bool(true),
                MetricValue::Int(3),
                MetricValue::Float(2.5),
                MetricValue::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
                MetricValue::Text("abc".into()),
            ]
        );
    }
}
