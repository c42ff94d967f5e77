//! Runtime candid values.

use std::fmt;

use ic_principal::Principal;
use num_bigint::{BigInt, BigUint};

use crate::hash::Label;

/// A candid value, mirroring the type variants of [`crate::Type`].
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    Null,
    Reserved,
    Bool(bool),
    Nat(BigUint),
    Int(BigInt),
    Nat8(u8),
    Nat16(u16),
    Nat32(u32),
    Nat64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Opt(Option<Box<Value>>),
    Vec(Vec<Value>),
    Record(Vec<(Label, Value)>),
    Variant { label: Label, value: Box<Value> },
    Principal(Principal),
    Func(Principal, String),
    Service(Principal),
}

impl Value {
    pub fn some(value: Value) -> Value {
        Value::Opt(Some(Box::new(value)))
    }

    pub fn none() -> Value {
        Value::Opt(None)
    }

    /// A record value; fields are ordered by wire id regardless of the
    /// order they are given in.
    pub fn record<L: Into<Label>>(fields: Vec<(L, Value)>) -> Value {
        let mut fields: Vec<(Label, Value)> = fields
            .into_iter()
            .map(|(label, value)| (label.into(), value))
            .collect();
        fields.sort_by_key(|(label, _)| label.id());
        Value::Record(fields)
    }

    /// A record with positional fields `0..n`.
    pub fn tuple(components: Vec<Value>) -> Value {
        Value::Record(
            components
                .into_iter()
                .enumerate()
                .map(|(index, value)| (Label::Id(index as u32), value))
                .collect(),
        )
    }

    pub fn variant<L: Into<Label>>(label: L, value: Value) -> Value {
        Value::Variant {
            label: label.into(),
            value: Box::new(value),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Reserved => f.write_str("reserved"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Nat(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Nat8(v) => write!(f, "{}", v),
            Value::Nat16(v) => write!(f, "{}", v),
            Value::Nat32(v) => write!(f, "{}", v),
            Value::Nat64(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{:?}", v),
            Value::Opt(None) => f.write_str("null"),
            Value::Opt(Some(v)) => write!(f, "opt {}", v),
            Value::Vec(items) => {
                f.write_str("vec {")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("}")
            }
            Value::Record(fields) => {
                f.write_str("record {")?;
                for (index, (label, value)) in fields.iter().enumerate() {
                    if index > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{} = {}", label, value)?;
                }
                f.write_str("}")
            }
            Value::Variant { label, value } => {
                if **value == Value::Null {
                    write!(f, "variant {{{}}}", label)
                } else {
                    write!(f, "variant {{{} = {}}}", label, value)
                }
            }
            Value::Principal(p) => write!(f, "principal \"{}\"", p),
            Value::Func(p, method) => write!(f, "func \"{}\".{}", p, method),
            Value::Service(p) => write!(f, "service \"{}\"", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_values() {
        assert_eq!(Value::some(Value::Nat8(7)).to_string(), "opt 7");
        assert_eq!(Value::none().to_string(), "null");
        assert_eq!(
            Value::record(vec![
                ("name", Value::Text("hi".to_string())),
                ("age", Value::Nat(7u32.into())),
            ])
            .to_string(),
            "record {age = 7; name = \"hi\"}"
        );
        assert_eq!(
            Value::variant("ok", Value::Null).to_string(),
            "variant {ok}"
        );
    }
}
