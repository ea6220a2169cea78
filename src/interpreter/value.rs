use std::fmt::Write as _;

/// A runtime value. `int` and `long` share the 64-bit representation; the
/// distinction only matters to the analyser.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bit(u8),
    Char(char),
    Str(String),
    Bool(bool),
    /// Index into the statevector register.
    Qubit(usize),
    Array(Vec<Value>),
    /// Handle into the object heap.
    Object(usize),
    Null,
}

impl Value {
    /// The display form used by `echo` and string coercion: arrays as
    /// `{a, b}`, booleans as `true`/`false`, bits as `0`/`1`, floats with
    /// default precision.
    pub fn render(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Bit(v) => v.to_string(),
            Value::Char(v) => v.to_string(),
            Value::Str(v) => v.clone(),
            Value::Bool(v) => v.to_string(),
            Value::Qubit(v) => format!("qubit#{v}"),
            Value::Array(elements) => {
                let mut out = String::from("{");
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{}", element.render());
                }
                out.push('}');
                out
            }
            Value::Object(handle) => format!("object#{handle}"),
            Value::Null => "null".into(),
        }
    }

    /// Truthiness of a condition value; only booleans and bits reach this
    /// point after analysis.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(v) => *v,
            Value::Bit(v) => *v != 0,
            Value::Int(v) => *v != 0,
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bit(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Bit(v) => Some(*v as f64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_scalars() {
        assert_eq!(Value::Int(42).render(), "42");
        assert_eq!(Value::Bool(true).render(), "true");
        assert_eq!(Value::Bit(1).render(), "1");
        assert_eq!(Value::Float(2.5).render(), "2.5");
        assert_eq!(Value::Str("hi".into()).render(), "hi");
        assert_eq!(Value::Null.render(), "null");
    }

    #[test]
    fn test_render_arrays() {
        let array = Value::Array(vec![Value::Bit(0), Value::Bit(1), Value::Bit(0)]);
        assert_eq!(array.render(), "{0, 1, 0}");
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Bit(1).is_truthy());
        assert!(!Value::Bit(0).is_truthy());
    }
}
