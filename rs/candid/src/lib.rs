//! The candid binary codec used by the wallet agent.
//!
//! Candid is the IC's interface definition language; this crate implements
//! its binary wire format: a `DIDL` magic header, a type table describing
//! the (possibly recursive) types of the transported values, and the value
//! encodings themselves.
//!
//! Types form a closed sum ([`Type`]); recursion goes through a [`TypeEnv`]
//! arena and [`Type::Var`] indices instead of mutable placeholder nodes.
//! Decoding applies candid's structural subtyping: callers state the types
//! they expect and the decoder reconciles them with the types the message
//! declares, skipping extra record fields and synthesizing absent optional
//! ones.
//!
//! ```
//! use ic_agent_candid::{decode, encode, Type, TypeEnv, Value};
//!
//! let env = TypeEnv::new();
//! let ty = Type::record(vec![("age", Type::Nat), ("name", Type::Text)]);
//! let value = Value::record(vec![
//!     ("age", Value::Nat(7u32.into())),
//!     ("name", Value::Text("hi".to_string())),
//! ]);
//! let bytes = encode(&env, &[ty.clone()], &[value.clone()]).unwrap();
//! assert_eq!(decode(&env, &[ty], &bytes).unwrap(), vec![value]);
//! ```

mod decode;
mod encode;
mod hash;
mod leb128;
mod types;
mod value;


pub use decode::decode;
pub use encode::encode;
pub use hash::{label_hash, Label};
pub use types::{Field, FuncAnnotation, FuncType, Type, TypeEnv, TypeId};
pub use value::Value;

pub(crate) const MAGIC: &[u8; 4] = b"DIDL";

/// Errors produced while encoding or decoding candid messages.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    /// The message violates the wire format: bad magic, truncated varint,
    /// unknown opcode, out-of-range index, unsorted fields, trailing
    /// garbage inside a structure.
    #[error("malformed candid message: {0}")]
    Malformed(String),

    /// The message is well-formed but its type is incompatible with the
    /// type the caller expects.
    #[error("type mismatch: cannot decode a value of wire type {wire} as {expected}")]
    TypeMismatch { expected: String, wire: String },

    /// A value handed to the encoder does not belong to the type it is
    /// being encoded as.
    #[error("value {value} does not belong to type {ty}")]
    ValueMismatch { ty: String, value: String },

    /// The expected record type requires a field the message does not
    /// carry (and the field is not optional).
    #[error("record field {field} is required but missing from the message")]
    MissingField { field: String },

    /// The message selects a variant alternative the expected type does
    /// not declare.
    #[error("cannot find field hash {hash} in the expected variant type")]
    UnknownVariantField { hash: u32 },

    /// Bytes remain after all values were decoded.
    #[error("{count} left-over bytes after decoding all values")]
    LeftoverBytes { count: usize },

    /// A recursive type slot was used before [`TypeEnv::fill`] completed
    /// it.
    #[error("recursive type rec_{0} is used before being filled")]
    UnfilledRecType(usize),

    /// `encode` was called with differing numbers of types and values.
    #[error("cannot encode {values} values against {types} types")]
    ArityMismatch { types: usize, values: usize },
}

/// Encodes a single value.
pub fn encode_one(env: &TypeEnv, ty: &Type, value: &Value) -> Result<Vec<u8>, Error> {
    encode(
        env,
        std::slice::from_ref(ty),
        std::slice::from_ref(value),
    )
}

/// Decodes a single value.
pub fn decode_one(env: &TypeEnv, ty: &Type, bytes: &[u8]) -> Result<Value, Error> {
    let mut values = decode(env, std::slice::from_ref(ty), bytes)?;
    Ok(values.pop().expect("decode returns one value per type"))
}
