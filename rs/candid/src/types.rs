//! The candid type system as a closed sum type.
//!
//! Recursive types are expressed through a [`TypeEnv`] arena:
//! [`Type::Var`] is an index into the arena, and a slot can be reserved
//! with [`TypeEnv::rec`] before its definition exists, then completed
//! exactly once with [`TypeEnv::fill`]. Using a reserved-but-unfilled slot
//! is always an error, never a silent default.

use std::fmt;

use crate::hash::Label;
use crate::Error;

// Wire opcodes of the primitive and constructed types, as signed LEB128
// values. Non-negative numbers on the wire are type-table indices instead.
pub(crate) mod opcode {
    pub const NULL: i64 = -1;
    pub const BOOL: i64 = -2;
    pub const NAT: i64 = -3;
    pub const INT: i64 = -4;
    pub const NAT8: i64 = -5;
    pub const NAT16: i64 = -6;
    pub const NAT32: i64 = -7;
    pub const NAT64: i64 = -8;
    pub const INT8: i64 = -9;
    pub const INT16: i64 = -10;
    pub const INT32: i64 = -11;
    pub const INT64: i64 = -12;
    pub const FLOAT32: i64 = -13;
    pub const FLOAT64: i64 = -14;
    pub const TEXT: i64 = -15;
    pub const RESERVED: i64 = -16;
    pub const EMPTY: i64 = -17;
    pub const OPT: i64 = -18;
    pub const VEC: i64 = -19;
    pub const RECORD: i64 = -20;
    pub const VARIANT: i64 = -21;
    pub const FUNC: i64 = -22;
    pub const SERVICE: i64 = -23;
    pub const PRINCIPAL: i64 = -24;
}

/// An index into a [`TypeEnv`], standing for a (possibly recursive) type
/// definition.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TypeId(pub usize);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec_{}", self.0)
    }
}

/// A candid type.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Type {
    Null,
    Bool,
    Nat,
    Int,
    Nat8,
    Nat16,
    Nat32,
    Nat64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Text,
    Reserved,
    Empty,
    /// Accepts any wire value and materializes it by its wire type. Cannot
    /// be encoded.
    Unknown,
    Principal,
    Opt(Box<Type>),
    Vec(Box<Type>),
    Record(Vec<Field>),
    Variant(Vec<Field>),
    Func(FuncType),
    Service(Vec<(String, FuncType)>),
    Var(TypeId),
}

/// A field of a record or variant.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Field {
    pub label: Label,
    pub ty: Type,
}

/// The signature of a canister method.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FuncType {
    pub args: Vec<Type>,
    pub rets: Vec<Type>,
    pub annotations: Vec<FuncAnnotation>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FuncAnnotation {
    Query,
    Oneway,
    CompositeQuery,
}

impl FuncAnnotation {
    pub(crate) fn wire_code(self) -> u8 {
        match self {
            FuncAnnotation::Query => 1,
            FuncAnnotation::Oneway => 2,
            FuncAnnotation::CompositeQuery => 3,
        }
    }

    pub(crate) fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(FuncAnnotation::Query),
            2 => Some(FuncAnnotation::Oneway),
            3 => Some(FuncAnnotation::CompositeQuery),
            _ => None,
        }
    }
}

impl fmt::Display for FuncAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuncAnnotation::Query => f.write_str("query"),
            FuncAnnotation::Oneway => f.write_str("oneway"),
            FuncAnnotation::CompositeQuery => f.write_str("composite_query"),
        }
    }
}

impl Type {
    /// The wire opcode if this is a primitive type.
    pub(crate) fn primitive_opcode(&self) -> Option<i64> {
        use opcode::*;
        match self {
            Type::Null => Some(NULL),
            Type::Bool => Some(BOOL),
            Type::Nat => Some(NAT),
            Type::Int => Some(INT),
            Type::Nat8 => Some(NAT8),
            Type::Nat16 => Some(NAT16),
            Type::Nat32 => Some(NAT32),
            Type::Nat64 => Some(NAT64),
            Type::Int8 => Some(INT8),
            Type::Int16 => Some(INT16),
            Type::Int32 => Some(INT32),
            Type::Int64 => Some(INT64),
            Type::Float32 => Some(FLOAT32),
            Type::Float64 => Some(FLOAT64),
            Type::Text => Some(TEXT),
            Type::Reserved => Some(RESERVED),
            Type::Empty => Some(EMPTY),
            Type::Principal => Some(PRINCIPAL),
            _ => None,
        }
    }

    pub(crate) fn primitive_from_opcode(op: i64) -> Option<Type> {
        use opcode::*;
        match op {
            NULL => Some(Type::Null),
            BOOL => Some(Type::Bool),
            NAT => Some(Type::Nat),
            INT => Some(Type::Int),
            NAT8 => Some(Type::Nat8),
            NAT16 => Some(Type::Nat16),
            NAT32 => Some(Type::Nat32),
            NAT64 => Some(Type::Nat64),
            INT8 => Some(Type::Int8),
            INT16 => Some(Type::Int16),
            INT32 => Some(Type::Int32),
            INT64 => Some(Type::Int64),
            FLOAT32 => Some(Type::Float32),
            FLOAT64 => Some(Type::Float64),
            TEXT => Some(Type::Text),
            RESERVED => Some(Type::Reserved),
            EMPTY => Some(Type::Empty),
            PRINCIPAL => Some(Type::Principal),
            _ => None,
        }
    }

    /// `opt t`
    pub fn opt(inner: Type) -> Type {
        Type::Opt(Box::new(inner))
    }

    /// `vec t`
    pub fn vec_of(inner: Type) -> Type {
        Type::Vec(Box::new(inner))
    }

    /// `record { ... }`; fields are ordered by wire id regardless of the
    /// order they are given in.
    pub fn record<L: Into<Label>>(fields: Vec<(L, Type)>) -> Type {
        Type::Record(sorted_fields(fields))
    }

    /// `variant { ... }`
    pub fn variant<L: Into<Label>>(fields: Vec<(L, Type)>) -> Type {
        Type::Variant(sorted_fields(fields))
    }

    /// A record with positional fields `0..n`.
    pub fn tuple(components: Vec<Type>) -> Type {
        Type::Record(
            components
                .into_iter()
                .enumerate()
                .map(|(index, ty)| Field {
                    label: Label::Id(index as u32),
                    ty,
                })
                .collect(),
        )
    }

    /// `func (args) -> (rets) annotations`
    pub fn func(args: Vec<Type>, rets: Vec<Type>, annotations: Vec<FuncAnnotation>) -> Type {
        Type::Func(FuncType {
            args,
            rets,
            annotations,
        })
    }

    /// `service { ... }`; methods are ordered by name.
    pub fn service(mut methods: Vec<(String, FuncType)>) -> Type {
        methods.sort_by(|a, b| a.0.cmp(&b.0));
        Type::Service(methods)
    }
}

fn sorted_fields<L: Into<Label>>(fields: Vec<(L, Type)>) -> Vec<Field> {
    let mut fields: Vec<Field> = fields
        .into_iter()
        .map(|(label, ty)| Field {
            label: label.into(),
            ty,
        })
        .collect();
    fields.sort_by_key(|field| field.label.id());
    fields
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Null => f.write_str("null"),
            Type::Bool => f.write_str("bool"),
            Type::Nat => f.write_str("nat"),
            Type::Int => f.write_str("int"),
            Type::Nat8 => f.write_str("nat8"),
            Type::Nat16 => f.write_str("nat16"),
            Type::Nat32 => f.write_str("nat32"),
            Type::Nat64 => f.write_str("nat64"),
            Type::Int8 => f.write_str("int8"),
            Type::Int16 => f.write_str("int16"),
            Type::Int32 => f.write_str("int32"),
            Type::Int64 => f.write_str("int64"),
            Type::Float32 => f.write_str("float32"),
            Type::Float64 => f.write_str("float64"),
            Type::Text => f.write_str("text"),
            Type::Reserved => f.write_str("reserved"),
            Type::Empty => f.write_str("empty"),
            Type::Unknown => f.write_str("unknown"),
            Type::Principal => f.write_str("principal"),
            Type::Opt(inner) => write!(f, "opt {}", inner),
            Type::Vec(inner) => write!(f, "vec {}", inner),
            Type::Record(fields) => write_fields(f, "record", fields),
            Type::Variant(fields) => write_fields(f, "variant", fields),
            Type::Func(func) => write!(f, "func {}", func),
            Type::Service(methods) => {
                f.write_str("service {")?;
                for (index, (name, func)) in methods.iter().enumerate() {
                    if index > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}:{}", name, func)?;
                }
                f.write_str("}")
            }
            Type::Var(id) => write!(f, "{}", id),
        }
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (index, arg) in self.args.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", arg)?;
        }
        f.write_str(") -> (")?;
        for (index, ret) in self.rets.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", ret)?;
        }
        f.write_str(")")?;
        for annotation in &self.annotations {
            write!(f, " {}", annotation)?;
        }
        Ok(())
    }
}

fn write_fields(f: &mut fmt::Formatter<'_>, keyword: &str, fields: &[Field]) -> fmt::Result {
    write!(f, "{} {{", keyword)?;
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            f.write_str("; ")?;
        }
        write!(f, "{}:{}", field.label, field.ty)?;
    }
    f.write_str("}")
}

/// An arena of numbered type definitions, the target of [`Type::Var`]
/// references.
#[derive(Clone, Debug, Default)]
pub struct TypeEnv {
    defs: Vec<Option<Type>>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Reserves a slot for a definition that does not exist yet, enabling
    /// self- and mutually-recursive types.
    pub fn rec(&mut self) -> TypeId {
        self.defs.push(None);
        TypeId(self.defs.len() - 1)
    }

    /// Completes a reserved slot. Each slot can be filled exactly once.
    pub fn fill(&mut self, id: TypeId, ty: Type) -> Result<(), Error> {
        match self.defs.get_mut(id.0) {
            None => Err(Error::Malformed(format!("no type slot {}", id))),
            Some(slot @ None) => {
                *slot = Some(ty);
                Ok(())
            }
            Some(Some(_)) => Err(Error::Malformed(format!("type slot {} already filled", id))),
        }
    }

    /// Adds a completed definition and returns its id.
    pub fn add(&mut self, ty: Type) -> TypeId {
        self.defs.push(Some(ty));
        TypeId(self.defs.len() - 1)
    }

    pub(crate) fn resolve(&self, id: TypeId) -> Result<&Type, Error> {
        match self.defs.get(id.0) {
            None => Err(Error::Malformed(format!("no type slot {}", id))),
            Some(None) => Err(Error::UnfilledRecType(id.0)),
            Some(Some(ty)) => Ok(ty),
        }
    }

    /// Follows `Var` references until a structural type is reached.
    pub(crate) fn trace<'a>(&'a self, mut ty: &'a Type) -> Result<&'a Type, Error> {
        let mut steps = 0;
        while let Type::Var(id) = ty {
            ty = self.resolve(*id)?;
            steps += 1;
            if steps > self.defs.len() {
                return Err(Error::Malformed(
                    "type definitions form a reference cycle".to_string(),
                ));
            }
        }
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn record_fields_are_sorted_by_id() {
        let ty = Type::record(vec![("name", Type::Text), ("age", Type::Nat)]);
        let Type::Record(fields) = &ty else {
            panic!("expected a record");
        };
        assert_eq!(fields[0].label, Label::from("age"));
        assert_eq!(fields[1].label, Label::from("name"));
    }

    #[test]
    fn displays_types() {
        assert_eq!(Type::opt(Type::Nat8).to_string(), "opt nat8");
        assert_eq!(
            Type::record(vec![("age", Type::Nat), ("name", Type::Text)]).to_string(),
            "record {age:nat; name:text}"
        );
        assert_eq!(
            Type::func(vec![Type::Text], vec![Type::Nat], vec![FuncAnnotation::Query]).to_string(),
            "func (text) -> (nat) query"
        );
    }

    #[test]
    fn unfilled_slot_fails_loudly() {
        let mut env = TypeEnv::new();
        let id = env.rec();
        assert_matches!(env.resolve(id), Err(Error::UnfilledRecType(0)));

        env.fill(id, Type::Nat).unwrap();
        assert_matches!(env.resolve(id), Ok(Type::Nat));
        assert_matches!(env.fill(id, Type::Int), Err(Error::Malformed(_)));
    }

    #[test]
    fn trace_rejects_var_cycles() {
        let mut env = TypeEnv::new();
        let a = env.rec();
        let b = env.rec();
        env.fill(a, Type::Var(b)).unwrap();
        env.fill(b, Type::Var(a)).unwrap();
        assert_matches!(env.trace(&Type::Var(a)), Err(Error::Malformed(_)));
    }
}
