//! The candid wire reader: type table parsing and subtyping-aware value
//! decoding.
//!
//! Everything here runs on attacker-controlled bytes, so each length and
//! index is validated against the message before it is used, and type
//! recursion that consumes no input is cut off by a nesting limit.

use ic_principal::Principal;
use num_bigint::BigInt;

use crate::hash::Label;
use crate::leb128::{read_leb128, read_leb128_u64, read_sleb128, read_sleb128_i64, Reader};
use crate::types::{opcode, Field, FuncAnnotation, FuncType, Type, TypeEnv, TypeId};
use crate::value::Value;
use crate::{Error, MAGIC};

// Bounds type-driven recursion (`Var` chains, records of records) that can
// run deeper than the bytes it consumes. Far above anything a legitimate
// canister interface nests.
const MAX_TYPE_NESTING: usize = 512;

// Zero-sized elements (null, reserved and records thereof) consume no
// message bytes, so vectors of them are bounded by count instead of by the
// message size.
const MAX_ZERO_SIZED_ELEMENTS: usize = 1 << 20;

/// Decodes a candid message into one value per expected type. `env`
/// supplies the definitions behind [`Type::Var`] references in `expected`.
pub fn decode(env: &TypeEnv, expected: &[Type], bytes: &[u8]) -> Result<Vec<Value>, Error> {
    let mut reader = Reader::new(bytes);
    let magic = reader.read_exact(MAGIC.len())?;
    if magic != MAGIC {
        return Err(Error::Malformed("magic number not found".to_string()));
    }

    let wire_env = parse_type_table(&mut reader)?;

    let argument_count = read_length(&mut reader, "argument count")?;
    let mut wire_types = Vec::with_capacity(argument_count);
    for _ in 0..argument_count {
        wire_types.push(type_from_index(
            read_sleb128_i64(&mut reader)?,
            wire_env.len(),
        )?);
    }

    let mut decoder = Decoder {
        reader,
        wire_env: &wire_env,
        expect_env: env,
        depth: 0,
    };

    let mut values = Vec::with_capacity(expected.len());
    for (position, expect) in expected.iter().enumerate() {
        match wire_types.get(position) {
            Some(wire) => values.push(decoder.decode_value(expect, wire)?),
            // Missing trailing arguments are only admissible for types that
            // have an "absent" notion of their own.
            None => match env.trace(expect)? {
                Type::Opt(_) => values.push(Value::Opt(None)),
                Type::Reserved => values.push(Value::Reserved),
                _ => {
                    return Err(Error::Malformed(format!(
                        "expected {} values, message carries {}",
                        expected.len(),
                        wire_types.len()
                    )))
                }
            },
        }
    }

    // Arguments the caller did not ask for still need their bytes consumed
    // for the trailing-bytes check to mean anything.
    for wire in wire_types.iter().skip(expected.len()) {
        decoder.skip_value(wire)?;
    }

    let leftover = decoder.reader.remaining();
    if leftover > 0 {
        return Err(Error::LeftoverBytes { count: leftover });
    }
    Ok(values)
}

// Reads a count the message must carry at least one byte per element for,
// preventing absurd pre-allocations.
fn read_length(reader: &mut Reader<'_>, what: &str) -> Result<usize, Error> {
    let length = read_leb128_u64(reader)?;
    let length =
        usize::try_from(length).map_err(|_| Error::Malformed(format!("{} out of range", what)))?;
    if length > reader.remaining() {
        return Err(Error::Malformed(format!(
            "{} {} exceeds the remaining message size",
            what, length
        )));
    }
    Ok(length)
}

fn type_from_index(index: i64, table_len: usize) -> Result<Type, Error> {
    if index >= 0 {
        let index = index as usize;
        if index >= table_len {
            return Err(Error::Malformed(format!(
                "type index {} out of range (table has {} entries)",
                index, table_len
            )));
        }
        return Ok(Type::Var(TypeId(index)));
    }
    Type::primitive_from_opcode(index)
        .ok_or_else(|| Error::Malformed(format!("unknown type opcode {}", index)))
}

// A table entry as first read off the wire. Service methods reference their
// function types by index, so they can only be materialized once the whole
// table is known.
enum RawDef {
    Direct(Type),
    Service(Vec<(String, Type)>),
}

fn parse_type_table(reader: &mut Reader<'_>) -> Result<TypeEnv, Error> {
    let count = read_length(reader, "type table size")?;

    let mut raw_defs = Vec::with_capacity(count);
    for _ in 0..count {
        let op = read_sleb128_i64(reader)?;
        let def = match op {
            opcode::OPT => RawDef::Direct(Type::Opt(Box::new(read_type_reference(reader, count)?))),
            opcode::VEC => RawDef::Direct(Type::Vec(Box::new(read_type_reference(reader, count)?))),
            opcode::RECORD => RawDef::Direct(Type::Record(read_field_list(reader, count)?)),
            opcode::VARIANT => RawDef::Direct(Type::Variant(read_field_list(reader, count)?)),
            opcode::FUNC => RawDef::Direct(Type::Func(read_func_type(reader, count)?)),
            opcode::SERVICE => RawDef::Service(read_service_methods(reader, count)?),
            _ => {
                return Err(Error::Malformed(format!(
                    "type table entries must be constructed types, got opcode {}",
                    op
                )))
            }
        };
        raw_defs.push(def);
    }

    // Function definitions land in the arena first, then services: a
    // service method may point at a function entry anywhere in the table,
    // and it must resolve to a function and nothing else.
    let mut env = TypeEnv::new();
    for _ in 0..count {
        env.rec();
    }
    for (position, def) in raw_defs.iter().enumerate() {
        if let RawDef::Direct(ty) = def {
            env.fill(TypeId(position), ty.clone())
                .expect("slots are reserved above and filled once");
        }
    }
    for (position, def) in raw_defs.iter().enumerate() {
        if let RawDef::Service(raw_methods) = def {
            let mut methods = Vec::with_capacity(raw_methods.len());
            for (name, reference) in raw_methods {
                let func = match env.trace(reference) {
                    Ok(Type::Func(func)) => func.clone(),
                    _ => {
                        return Err(Error::Malformed(format!(
                            "service method {} does not reference a function type",
                            name
                        )))
                    }
                };
                methods.push((name.clone(), func));
            }
            env.fill(TypeId(position), Type::Service(methods))
                .expect("slots are reserved above and filled once");
        }
    }
    Ok(env)
}

fn read_type_reference(reader: &mut Reader<'_>, table_len: usize) -> Result<Type, Error> {
    type_from_index(read_sleb128_i64(reader)?, table_len)
}

fn read_field_list(reader: &mut Reader<'_>, table_len: usize) -> Result<Vec<Field>, Error> {
    let count = read_length(reader, "field count")?;
    let mut fields = Vec::with_capacity(count);
    let mut previous: Option<u32> = None;
    for _ in 0..count {
        let id = read_leb128_u64(reader)?;
        let id = u32::try_from(id)
            .map_err(|_| Error::Malformed(format!("field id {} out of range", id)))?;
        if previous.is_some_and(|p| p >= id) {
            return Err(Error::Malformed(format!(
                "field ids are not sorted strictly increasing at {}",
                id
            )));
        }
        previous = Some(id);
        fields.push(Field {
            label: Label::Id(id),
            ty: read_type_reference(reader, table_len)?,
        });
    }
    Ok(fields)
}

fn read_type_list(reader: &mut Reader<'_>, table_len: usize) -> Result<Vec<Type>, Error> {
    let count = read_length(reader, "type list size")?;
    let mut types = Vec::with_capacity(count);
    for _ in 0..count {
        types.push(read_type_reference(reader, table_len)?);
    }
    Ok(types)
}

fn read_func_type(reader: &mut Reader<'_>, table_len: usize) -> Result<FuncType, Error> {
    let args = read_type_list(reader, table_len)?;
    let rets = read_type_list(reader, table_len)?;
    let annotation_count = read_length(reader, "annotation count")?;
    let mut annotations = Vec::with_capacity(annotation_count);
    for _ in 0..annotation_count {
        let code = reader.read_byte()?;
        annotations.push(
            FuncAnnotation::from_wire_code(code)
                .ok_or_else(|| Error::Malformed(format!("unknown function annotation {}", code)))?,
        );
    }
    Ok(FuncType {
        args,
        rets,
        annotations,
    })
}

fn read_service_methods(
    reader: &mut Reader<'_>,
    table_len: usize,
) -> Result<Vec<(String, Type)>, Error> {
    let count = read_length(reader, "method count")?;
    let mut methods = Vec::with_capacity(count);
    let mut previous: Option<String> = None;
    for _ in 0..count {
        let name_len = read_length(reader, "method name length")?;
        let name = String::from_utf8(reader.read_exact(name_len)?.to_vec())
            .map_err(|_| Error::Malformed("method name is not valid UTF-8".to_string()))?;
        if previous.as_deref().is_some_and(|p| p >= name.as_str()) {
            return Err(Error::Malformed(format!(
                "service methods are not sorted at {}",
                name
            )));
        }
        let reference = read_type_reference(reader, table_len)?;
        previous = Some(name.clone());
        methods.push((name, reference));
    }
    Ok(methods)
}

struct Decoder<'a, 'b> {
    reader: Reader<'a>,
    wire_env: &'b TypeEnv,
    expect_env: &'b TypeEnv,
    depth: usize,
}

impl<'a, 'b> Decoder<'a, 'b> {
    fn decode_value(&mut self, expect: &Type, wire: &Type) -> Result<Value, Error> {
        self.enter()?;
        let result = self.decode_value_inner(expect, wire);
        self.depth -= 1;
        result
    }

    fn enter(&mut self) -> Result<(), Error> {
        self.depth += 1;
        if self.depth > MAX_TYPE_NESTING {
            return Err(Error::Malformed(
                "type nesting exceeds the supported depth".to_string(),
            ));
        }
        Ok(())
    }

    fn decode_value_inner(&mut self, expect: &Type, wire: &Type) -> Result<Value, Error> {
        let expect = self.expect_env.trace(expect)?;
        let wire = self.wire_env.trace(wire)?;

        match expect {
            // Unknown takes whatever the wire carries, shaped by the wire
            // type alone.
            Type::Unknown => return self.decode_by_wire_type(wire),
            // Reserved accepts any value but keeps none of it.
            Type::Reserved => {
                self.decode_by_wire_type(wire)?;
                return Ok(Value::Reserved);
            }
            Type::Opt(inner) => return self.decode_opt(inner, wire),
            _ => {}
        }

        match (expect, wire) {
            (Type::Null, Type::Null) => Ok(Value::Null),
            (Type::Bool, Type::Bool) => self.read_bool(),
            (Type::Nat, Type::Nat) => Ok(Value::Nat(read_leb128(&mut self.reader)?)),
            (Type::Int, Type::Int) => Ok(Value::Int(read_sleb128(&mut self.reader)?)),
            // nat is a subtype of int.
            (Type::Int, Type::Nat) => Ok(Value::Int(BigInt::from(read_leb128(&mut self.reader)?))),
            (Type::Nat8, Type::Nat8) => Ok(Value::Nat8(self.reader.read_byte()?)),
            (Type::Nat16, Type::Nat16) => Ok(Value::Nat16(u16::from_le_bytes(self.read_array()?))),
            (Type::Nat32, Type::Nat32) => Ok(Value::Nat32(u32::from_le_bytes(self.read_array()?))),
            (Type::Nat64, Type::Nat64) => Ok(Value::Nat64(u64::from_le_bytes(self.read_array()?))),
            (Type::Int8, Type::Int8) => Ok(Value::Int8(i8::from_le_bytes(self.read_array()?))),
            (Type::Int16, Type::Int16) => Ok(Value::Int16(i16::from_le_bytes(self.read_array()?))),
            (Type::Int32, Type::Int32) => Ok(Value::Int32(i32::from_le_bytes(self.read_array()?))),
            (Type::Int64, Type::Int64) => Ok(Value::Int64(i64::from_le_bytes(self.read_array()?))),
            (Type::Float32, Type::Float32) => {
                Ok(Value::Float32(f32::from_le_bytes(self.read_array()?)))
            }
            (Type::Float64, Type::Float64) => {
                Ok(Value::Float64(f64::from_le_bytes(self.read_array()?)))
            }
            (Type::Text, Type::Text) => Ok(Value::Text(self.read_text()?)),
            (Type::Principal, Type::Principal) => Ok(Value::Principal(self.read_principal()?)),
            (Type::Vec(expect_item), Type::Vec(wire_item)) => {
                let length = self.read_vec_length(wire_item)?;
                let mut items = Vec::with_capacity(length.min(4096));
                for _ in 0..length {
                    items.push(self.decode_value(expect_item, wire_item)?);
                }
                Ok(Value::Vec(items))
            }
            (Type::Record(expect_fields), Type::Record(wire_fields)) => {
                self.decode_record(expect_fields, wire_fields)
            }
            (Type::Variant(expect_fields), Type::Variant(wire_fields)) => {
                self.decode_variant(expect_fields, wire_fields)
            }
            (Type::Func(_), Type::Func(_)) => {
                self.read_reference_flag("function")?;
                let principal = self.read_principal()?;
                let method = self.read_text()?;
                Ok(Value::Func(principal, method))
            }
            (Type::Service(_), Type::Service(_)) => Ok(Value::Service(self.read_principal()?)),
            (expect, wire) => Err(Error::TypeMismatch {
                expected: expect.to_string(),
                wire: wire.to_string(),
            }),
        }
    }

    // Both halves of the opt subtyping rule: wire null/reserved decode to
    // an absent value, and a present wire value that fails to decode as the
    // expected payload is treated as absent rather than failing the whole
    // message, so interface upgrades that change an opt payload type stay
    // readable.
    fn decode_opt(&mut self, expect_inner: &Type, wire: &Type) -> Result<Value, Error> {
        match wire {
            Type::Null | Type::Reserved => Ok(Value::Opt(None)),
            Type::Opt(wire_inner) => match self.reader.read_byte()? {
                0 => Ok(Value::Opt(None)),
                1 => {
                    let checkpoint = self.reader.pos();
                    match self.decode_value(expect_inner, wire_inner) {
                        Ok(value) => Ok(Value::some(value)),
                        Err(_) => {
                            self.reader.set_pos(checkpoint);
                            self.skip_value(wire_inner)?;
                            Ok(Value::Opt(None))
                        }
                    }
                }
                other => Err(Error::Malformed(format!("invalid opt tag {}", other))),
            },
            _ => Err(Error::TypeMismatch {
                expected: format!("opt {}", expect_inner),
                wire: wire.to_string(),
            }),
        }
    }

    // Two-pointer merge over the wire's and the caller's field lists, both
    // sorted by id.
    fn decode_record(
        &mut self,
        expect_fields: &[Field],
        wire_fields: &[Field],
    ) -> Result<Value, Error> {
        let mut values = Vec::with_capacity(expect_fields.len());
        let mut expect_iter = expect_fields.iter().peekable();

        for wire_field in wire_fields {
            while let Some(expect_field) =
                expect_iter.next_if(|e| e.label.id() < wire_field.label.id())
            {
                values.push((
                    expect_field.label.clone(),
                    self.missing_field_value(expect_field)?,
                ));
            }
            match expect_iter.next_if(|e| e.label.id() == wire_field.label.id()) {
                Some(expect_field) => {
                    let value = self.decode_value(&expect_field.ty, &wire_field.ty)?;
                    values.push((expect_field.label.clone(), value));
                }
                // A wire field the caller did not ask for: decode and
                // discard to advance the cursor.
                None => self.skip_value(&wire_field.ty)?,
            }
        }
        for expect_field in expect_iter {
            values.push((
                expect_field.label.clone(),
                self.missing_field_value(expect_field)?,
            ));
        }
        Ok(Value::Record(values))
    }

    fn missing_field_value(&self, expect_field: &Field) -> Result<Value, Error> {
        match self.expect_env.trace(&expect_field.ty)? {
            Type::Opt(_) => Ok(Value::Opt(None)),
            Type::Reserved => Ok(Value::Reserved),
            _ => Err(Error::MissingField {
                field: expect_field.label.to_string(),
            }),
        }
    }

    fn decode_variant(
        &mut self,
        expect_fields: &[Field],
        wire_fields: &[Field],
    ) -> Result<Value, Error> {
        let index = read_leb128_u64(&mut self.reader)?;
        let wire_field = usize::try_from(index)
            .ok()
            .and_then(|index| wire_fields.get(index))
            .ok_or_else(|| Error::Malformed(format!("variant index {} out of range", index)))?;
        let expect_field = expect_fields
            .iter()
            .find(|field| field.label.id() == wire_field.label.id())
            .ok_or(Error::UnknownVariantField {
                hash: wire_field.label.id(),
            })?;
        let value = self.decode_value(&expect_field.ty, &wire_field.ty)?;
        Ok(Value::Variant {
            label: expect_field.label.clone(),
            value: Box::new(value),
        })
    }

    // Materializes a value shaped by the wire type alone. Also the skip
    // path: decoding against the wire type is exactly what it takes to
    // advance the cursor past a value.
    fn decode_by_wire_type(&mut self, wire: &Type) -> Result<Value, Error> {
        self.enter()?;
        let result = self.decode_by_wire_type_inner(wire);
        self.depth -= 1;
        result
    }

    fn decode_by_wire_type_inner(&mut self, wire: &Type) -> Result<Value, Error> {
        let wire = self.wire_env.trace(wire)?;
        match wire {
            Type::Null => Ok(Value::Null),
            Type::Reserved => Ok(Value::Reserved),
            Type::Empty => Err(Error::Malformed("the empty type has no values".to_string())),
            Type::Unknown => Err(Error::Malformed(
                "the unknown type cannot appear on the wire".to_string(),
            )),
            Type::Bool => self.read_bool(),
            Type::Nat => Ok(Value::Nat(read_leb128(&mut self.reader)?)),
            Type::Int => Ok(Value::Int(read_sleb128(&mut self.reader)?)),
            Type::Nat8 => Ok(Value::Nat8(self.reader.read_byte()?)),
            Type::Nat16 => Ok(Value::Nat16(u16::from_le_bytes(self.read_array()?))),
            Type::Nat32 => Ok(Value::Nat32(u32::from_le_bytes(self.read_array()?))),
            Type::Nat64 => Ok(Value::Nat64(u64::from_le_bytes(self.read_array()?))),
            Type::Int8 => Ok(Value::Int8(i8::from_le_bytes(self.read_array()?))),
            Type::Int16 => Ok(Value::Int16(i16::from_le_bytes(self.read_array()?))),
            Type::Int32 => Ok(Value::Int32(i32::from_le_bytes(self.read_array()?))),
            Type::Int64 => Ok(Value::Int64(i64::from_le_bytes(self.read_array()?))),
            Type::Float32 => Ok(Value::Float32(f32::from_le_bytes(self.read_array()?))),
            Type::Float64 => Ok(Value::Float64(f64::from_le_bytes(self.read_array()?))),
            Type::Text => Ok(Value::Text(self.read_text()?)),
            Type::Principal => Ok(Value::Principal(self.read_principal()?)),
            Type::Opt(inner) => match self.reader.read_byte()? {
                0 => Ok(Value::Opt(None)),
                1 => Ok(Value::some(self.decode_by_wire_type(inner)?)),
                other => Err(Error::Malformed(format!("invalid opt tag {}", other))),
            },
            Type::Vec(item) => {
                let length = self.read_vec_length(item)?;
                let mut items = Vec::with_capacity(length.min(4096));
                for _ in 0..length {
                    items.push(self.decode_by_wire_type(item)?);
                }
                Ok(Value::Vec(items))
            }
            Type::Record(fields) => {
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    values.push((field.label.clone(), self.decode_by_wire_type(&field.ty)?));
                }
                Ok(Value::Record(values))
            }
            Type::Variant(fields) => {
                let index = read_leb128_u64(&mut self.reader)?;
                let field = usize::try_from(index)
                    .ok()
                    .and_then(|index| fields.get(index))
                    .ok_or_else(|| {
                        Error::Malformed(format!("variant index {} out of range", index))
                    })?;
                let value = self.decode_by_wire_type(&field.ty)?;
                Ok(Value::Variant {
                    label: field.label.clone(),
                    value: Box::new(value),
                })
            }
            Type::Func(_) => {
                self.read_reference_flag("function")?;
                let principal = self.read_principal()?;
                let method = self.read_text()?;
                Ok(Value::Func(principal, method))
            }
            Type::Service(_) => Ok(Value::Service(self.read_principal()?)),
            Type::Var(_) => unreachable!("trace resolves vars"),
        }
    }

    fn skip_value(&mut self, wire: &Type) -> Result<(), Error> {
        self.decode_by_wire_type(wire).map(|_| ())
    }

    // A vector length, bounded by the message size when each element costs
    // at least one byte, and by a fixed cap when elements are zero-sized.
    fn read_vec_length(&mut self, item: &Type) -> Result<usize, Error> {
        let length = read_leb128_u64(&mut self.reader)?;
        let length = usize::try_from(length)
            .map_err(|_| Error::Malformed("vector length out of range".to_string()))?;
        let bound = if self.is_zero_sized(item, 0)? {
            MAX_ZERO_SIZED_ELEMENTS
        } else {
            self.reader.remaining()
        };
        if length > bound {
            return Err(Error::Malformed(format!(
                "vector length {} exceeds what the message can carry",
                length
            )));
        }
        Ok(length)
    }

    fn is_zero_sized(&self, wire: &Type, depth: usize) -> Result<bool, Error> {
        if depth > MAX_TYPE_NESTING {
            return Err(Error::Malformed(
                "type nesting exceeds the supported depth".to_string(),
            ));
        }
        match self.wire_env.trace(wire)? {
            Type::Null | Type::Reserved => Ok(true),
            Type::Record(fields) => {
                for field in fields {
                    if !self.is_zero_sized(&field.ty, depth + 1)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn read_bool(&mut self) -> Result<Value, Error> {
        match self.reader.read_byte()? {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            other => Err(Error::Malformed(format!("invalid boolean value {}", other))),
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        Ok(self
            .reader
            .read_exact(N)?
            .try_into()
            .expect("read_exact returns the requested length"))
    }

    fn read_text(&mut self) -> Result<String, Error> {
        let length = read_length(&mut self.reader, "text length")?;
        let bytes = self.reader.read_exact(length)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Malformed("text is not valid UTF-8".to_string()))
    }

    fn read_reference_flag(&mut self, what: &str) -> Result<(), Error> {
        match self.reader.read_byte()? {
            1 => Ok(()),
            0 => Err(Error::Malformed(format!(
                "opaque {} references are not supported",
                what
            ))),
            other => Err(Error::Malformed(format!(
                "invalid {} reference tag {}",
                what, other
            ))),
        }
    }

    fn read_principal(&mut self) -> Result<Principal, Error> {
        self.read_reference_flag("principal")?;
        let length = read_length(&mut self.reader, "principal length")?;
        let bytes = self.reader.read_exact(length)?;
        Principal::try_from_slice(bytes)
            .map_err(|err| Error::Malformed(format!("invalid principal: {}", err)))
    }
}
