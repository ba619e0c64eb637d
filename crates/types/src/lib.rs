//! Scalar SQL types and the runtime value union shared across the workspace.

use std::cmp::Ordering;
use std::fmt;

/// Declared column type, as written in `CREATE TABLE`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Int,
    Varchar(u32),
    Char(u32),
    Text,
    Boolean,
    Float,
    Double,
    /// Fixed-point, `(precision, scale)`.
    Decimal(u8, u8),
    Date,
    Time,
    DateTime,
    Timestamp,
}

impl SqlType {
    /// Name as it would appear in a `CREATE TABLE` statement.
    pub fn type_name(&self) -> String {
        match self {
            SqlType::Int => "INT".into(),
            SqlType::Varchar(n) => format!("VARCHAR({n})"),
            SqlType::Char(n) => format!("CHAR({n})"),
            SqlType::Text => "TEXT".into(),
            SqlType::Boolean => "BOOLEAN".into(),
            SqlType::Float => "FLOAT".into(),
            SqlType::Double => "DOUBLE".into(),
            SqlType::Decimal(p, s) => format!("DECIMAL({p},{s})"),
            SqlType::Date => "DATE".into(),
            SqlType::Time => "TIME".into(),
            SqlType::DateTime => "DATETIME".into(),
            SqlType::Timestamp => "TIMESTAMP".into(),
        }
    }

    /// True if this type holds character data.
    pub fn is_string(&self) -> bool {
        matches!(self, SqlType::Varchar(_) | SqlType::Char(_) | SqlType::Text)
    }

    /// True if values of this type participate in arithmetic.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::Int | SqlType::Float | SqlType::Double | SqlType::Decimal(_, _)
        )
    }
}

/// Runtime value union. Every `SqlType` materializes as one of these variants.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    /// Scaled fixed-point: the stored integer times `10^-scale`.
    Decimal(i128, u8),
    Text(String),
    Bool(bool),
    /// Days since the Unix epoch.
    Date(i64),
    /// Milliseconds since midnight.
    Time(i64),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Null,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_same_type(other).unwrap_or(false)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(unscaled, scale) => write!(f, "{}", format_decimal(*unscaled, *scale)),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::DateTime(t) => write!(f, "{t}"),
            Value::Timestamp(t) => write!(f, "{t}"),
            Value::Null => write!(f, "NULL"),
        }
    }
}

fn format_decimal(unscaled: i128, scale: u8) -> String {
    if scale == 0 {
        return unscaled.to_string();
    }
    let negative = unscaled < 0;
    let magnitude = unscaled.unsigned_abs();
    let divisor = 10u128.pow(scale as u32);
    let whole = magnitude / divisor;
    let frac = magnitude % divisor;
    format!(
        "{}{}.{:0width$}",
        if negative { "-" } else { "" },
        whole,
        frac,
        width = scale as usize
    )
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric value as `f64`, for arithmetic and aggregate evaluation.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(v) => Some(*v),
            Value::Decimal(unscaled, scale) => Some(*unscaled as f64 / 10f64.powi(*scale as i32)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "INT",
            Value::Float(_) => "FLOAT",
            Value::Decimal(_, _) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bool(_) => "BOOLEAN",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::DateTime(_) => "DATETIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Null => "NULL",
        }
    }

    /// Compare two values. Cross-type comparisons (other than between numeric
    /// kinds) and any comparison touching `Null` return `None`: "string and
    /// numeric compare only within their own type".
    pub fn cmp_same_type(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Time(a), Time(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (Null, _) | (_, Null) => None,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    pub fn eq_same_type(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Null, Value::Null) => None,
            _ => self.cmp_same_type(other).map(|o| o == Ordering::Equal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn cmp_same_type_works() {
        assert_eq!(Value::Int(1).cmp_same_type(&Value::Int(2)), Some(Less));
        assert_eq!(Value::Int(1).cmp_same_type(&Value::Text("1".into())), None);
    }

    #[test]
    fn truthiness_is_strict() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Bool(false).as_bool(), Some(false));
        assert_eq!(Value::Int(1).as_bool(), None);
        assert_eq!(Value::Text("true".into()).as_bool(), None);
        assert_eq!(Value::Null.as_bool(), None);
    }

    #[test]
    fn comparisons_require_same_type() {
        assert_eq!(Value::Int(1).cmp_same_type(&Value::Int(2)), Some(Less));
        assert_eq!(
            Value::Text("a".into()).cmp_same_type(&Value::Text("a".into())),
            Some(Equal)
        );
        assert_eq!(
            Value::Bool(true).cmp_same_type(&Value::Bool(false)),
            Some(Greater)
        );
        // Cross-type should reject
        assert_eq!(Value::Int(1).cmp_same_type(&Value::Text("1".into())), None);
        assert_eq!(Value::Null.cmp_same_type(&Value::Int(1)), None);
    }

    #[test]
    fn equality_requires_same_type() {
        assert_eq!(Value::Int(1).eq_same_type(&Value::Int(1)), Some(true));
        assert_eq!(Value::Int(1).eq_same_type(&Value::Int(2)), Some(false));
        assert_eq!(
            Value::Text("abc".into()).eq_same_type(&Value::Text("abc".into())),
            Some(true)
        );
        assert_eq!(
            Value::Bool(true).eq_same_type(&Value::Bool(false)),
            Some(false)
        );
        // Cross-type returns None
        assert_eq!(Value::Text("1".into()).eq_same_type(&Value::Int(1)), None);
        assert_eq!(Value::Null.eq_same_type(&Value::Null), None);
    }

    #[test]
    fn decimal_formatting_respects_scale() {
        assert_eq!(format_decimal(12345, 2), "123.45");
        assert_eq!(format_decimal(-500, 2), "-5.00");
        assert_eq!(format_decimal(7, 0), "7");
    }

    #[test]
    fn serde_round_trip_stability() {
        let vals = vec![
            Value::Int(-42),
            Value::Text("Ada".into()),
            Value::Bool(true),
            Value::Null,
            Value::Decimal(12345, 2),
        ];

        let json = serde_json::to_string(&vals).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();

        for (a, b) in vals.iter().zip(back.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn ordering_is_consistent() {
        let a = Value::Int(5);
        let b = Value::Int(7);
        let c = Value::Int(5);

        assert_eq!(a.cmp_same_type(&b), Some(Less));
        assert_eq!(b.cmp_same_type(&a), Some(Greater));
        assert_eq!(a.cmp_same_type(&c), Some(Equal));
    }

    proptest! {
        // Order symmetry: if a < b, then b > a
        #[test]
        fn order_is_antisymmetric(i in any::<i64>(), j in any::<i64>()) {
            let a = Value::Int(i);
            let b = Value::Int(j);
            let ord1 = a.cmp_same_type(&b);
            let ord2 = b.cmp_same_type(&a);
            match (ord1, ord2) {
                (Some(o1), Some(o2)) => assert_eq!(o1, o2.reverse()),
                _ => prop_assert!(true),
            }
        }

        // Reflexivity: every value equals itself
        #[test]
        fn eq_reflexive(val in any::<i64>()) {
            let v = Value::Int(val);
            assert_eq!(v.eq_same_type(&v), Some(true));
        }

        // Text comparisons align with standard String ordering
        #[test]
        fn text_cmp_matches_std(a in ".*", b in ".*") {
            let va = Value::Text(a.clone());
            let vb = Value::Text(b.clone());
            assert_eq!(va.cmp_same_type(&vb), Some(a.cmp(&b)));
        }
    }
}
