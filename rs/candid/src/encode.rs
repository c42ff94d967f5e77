//! The candid wire writer: magic, type table, argument types, values.

use std::collections::HashMap;

use ic_principal::Principal;
use num_bigint::BigInt;

use crate::leb128::{write_leb128, write_leb128_u64, write_sleb128, write_sleb128_i64};
use crate::types::{opcode, Field, FuncType, Type, TypeEnv};
use crate::value::Value;
use crate::{Error, MAGIC};

/// Encodes `values` against `types` into a candid message. `env` supplies
/// the definitions behind any [`Type::Var`] references.
pub fn encode(env: &TypeEnv, types: &[Type], values: &[Value]) -> Result<Vec<u8>, Error> {
    if types.len() != values.len() {
        return Err(Error::ArityMismatch {
            types: types.len(),
            values: values.len(),
        });
    }

    let mut table = TypeTable::new(env);
    let mut argument_indices = Vec::with_capacity(types.len());
    for ty in types {
        argument_indices.push(table.index_of(ty)?);
    }

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    table.serialize(&mut out);
    write_leb128_u64(&mut out, types.len() as u64);
    for index in argument_indices {
        write_sleb128_i64(&mut out, index);
    }
    for (ty, value) in types.iter().zip(values) {
        encode_value(env, ty, value, &mut out)?;
    }
    Ok(out)
}

// Collects the constructed types reachable from the argument types into a
// numbered table, deduplicating structurally identical definitions by their
// display form. A slot is reserved before its body is emitted, so
// self-referential definitions resolve to their own index.
struct TypeTable<'a> {
    env: &'a TypeEnv,
    entries: Vec<Option<Vec<u8>>>,
    indices: HashMap<String, i64>,
}

impl<'a> TypeTable<'a> {
    fn new(env: &'a TypeEnv) -> Self {
        Self {
            env,
            entries: Vec::new(),
            indices: HashMap::new(),
        }
    }

    // Returns the signed index to reference `ty` by: a negative opcode for
    // primitives, a table index otherwise.
    fn index_of(&mut self, ty: &Type) -> Result<i64, Error> {
        if let Some(op) = ty.primitive_opcode() {
            return Ok(op);
        }
        match ty {
            Type::Unknown => Err(Error::Malformed(
                "the unknown type cannot appear in an encoded message".to_string(),
            )),
            Type::Var(id) => {
                let resolved = self.env.trace(ty)?;
                if let Some(op) = resolved.primitive_opcode() {
                    return Ok(op);
                }
                self.named_entry(format!("{}", id), resolved)
            }
            _ => self.named_entry(ty.to_string(), ty),
        }
    }

    fn named_entry(&mut self, key: String, ty: &Type) -> Result<i64, Error> {
        if let Some(&index) = self.indices.get(&key) {
            return Ok(index);
        }
        let index = self.entries.len() as i64;
        self.entries.push(None);
        self.indices.insert(key, index);
        let body = self.build_entry(ty)?;
        self.entries[index as usize] = Some(body);
        Ok(index)
    }

    fn build_entry(&mut self, ty: &Type) -> Result<Vec<u8>, Error> {
        let mut body = Vec::new();
        match ty {
            Type::Opt(inner) => {
                write_sleb128_i64(&mut body, opcode::OPT);
                let index = self.index_of(inner)?;
                write_sleb128_i64(&mut body, index);
            }
            Type::Vec(inner) => {
                write_sleb128_i64(&mut body, opcode::VEC);
                let index = self.index_of(inner)?;
                write_sleb128_i64(&mut body, index);
            }
            Type::Record(fields) => {
                write_sleb128_i64(&mut body, opcode::RECORD);
                self.build_fields(&mut body, fields)?;
            }
            Type::Variant(fields) => {
                write_sleb128_i64(&mut body, opcode::VARIANT);
                self.build_fields(&mut body, fields)?;
            }
            Type::Func(func) => {
                write_sleb128_i64(&mut body, opcode::FUNC);
                self.build_func(&mut body, func)?;
            }
            Type::Service(methods) => {
                write_sleb128_i64(&mut body, opcode::SERVICE);
                write_leb128_u64(&mut body, methods.len() as u64);
                let mut previous: Option<&str> = None;
                for (name, func) in methods {
                    if previous.is_some_and(|p| p >= name.as_str()) {
                        return Err(Error::Malformed(format!(
                            "service methods are not sorted at {}",
                            name
                        )));
                    }
                    previous = Some(name.as_str());
                    write_leb128_u64(&mut body, name.len() as u64);
                    body.extend_from_slice(name.as_bytes());
                    let index = self.index_of(&Type::Func(func.clone()))?;
                    write_sleb128_i64(&mut body, index);
                }
            }
            // Primitives, Unknown and Var never reach build_entry.
            _ => unreachable!("build_entry called on non-constructed type"),
        }
        Ok(body)
    }

    fn build_fields(&mut self, body: &mut Vec<u8>, fields: &[Field]) -> Result<(), Error> {
        write_leb128_u64(body, fields.len() as u64);
        let mut previous: Option<u32> = None;
        for field in fields {
            let id = field.label.id();
            if previous.is_some_and(|p| p >= id) {
                return Err(Error::Malformed(format!(
                    "fields are not sorted by id at {}",
                    field.label
                )));
            }
            previous = Some(id);
            write_leb128_u64(body, id as u64);
            let index = self.index_of(&field.ty)?;
            write_sleb128_i64(body, index);
        }
        Ok(())
    }

    fn build_func(&mut self, body: &mut Vec<u8>, func: &FuncType) -> Result<(), Error> {
        for types in [&func.args, &func.rets] {
            write_leb128_u64(body, types.len() as u64);
            for ty in types {
                let index = self.index_of(ty)?;
                write_sleb128_i64(body, index);
            }
        }
        write_leb128_u64(body, func.annotations.len() as u64);
        for annotation in &func.annotations {
            body.push(annotation.wire_code());
        }
        Ok(())
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        write_leb128_u64(out, self.entries.len() as u64);
        for entry in &self.entries {
            out.extend_from_slice(entry.as_ref().expect("all table entries are built"));
        }
    }
}

pub(crate) fn write_principal(out: &mut Vec<u8>, principal: &Principal) {
    // Reference flag: 1 marks a transparent (id carried inline) reference.
    out.push(1);
    let bytes = principal.as_slice();
    write_leb128_u64(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn write_text(out: &mut Vec<u8>, text: &str) {
    write_leb128_u64(out, text.len() as u64);
    out.extend_from_slice(text.as_bytes());
}

fn encode_value(env: &TypeEnv, ty: &Type, value: &Value, out: &mut Vec<u8>) -> Result<(), Error> {
    let ty = env.trace(ty)?;
    match (ty, value) {
        (Type::Null, Value::Null) => {}
        // Reserved swallows any value and carries no bytes.
        (Type::Reserved, _) => {}
        (Type::Bool, Value::Bool(v)) => out.push(*v as u8),
        (Type::Nat, Value::Nat(v)) => write_leb128(out, v),
        (Type::Int, Value::Int(v)) => write_sleb128(out, v),
        // nat is a subtype of int.
        (Type::Int, Value::Nat(v)) => write_sleb128(out, &BigInt::from(v.clone())),
        (Type::Nat8, Value::Nat8(v)) => out.push(*v),
        (Type::Nat16, Value::Nat16(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Type::Nat32, Value::Nat32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Type::Nat64, Value::Nat64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Type::Int8, Value::Int8(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Type::Int16, Value::Int16(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Type::Int32, Value::Int32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Type::Int64, Value::Int64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Type::Float32, Value::Float32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Type::Float64, Value::Float64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (Type::Text, Value::Text(v)) => write_text(out, v),
        (Type::Principal, Value::Principal(p)) => write_principal(out, p),
        (Type::Opt(_), Value::Opt(None)) => out.push(0),
        (Type::Opt(inner), Value::Opt(Some(v))) => {
            out.push(1);
            encode_value(env, inner, v, out)?;
        }
        (Type::Vec(inner), Value::Vec(items)) => {
            write_leb128_u64(out, items.len() as u64);
            for item in items {
                encode_value(env, inner, item, out)?;
            }
        }
        (Type::Record(fields), Value::Record(entries)) => {
            for field in fields {
                let entry = entries
                    .iter()
                    .find(|(label, _)| label.id() == field.label.id())
                    .ok_or_else(|| Error::ValueMismatch {
                        ty: ty.to_string(),
                        value: value.to_string(),
                    })?;
                encode_value(env, &field.ty, &entry.1, out)?;
            }
        }
        (Type::Variant(fields), Value::Variant { label, value: v }) => {
            let position = fields
                .iter()
                .position(|field| field.label.id() == label.id())
                .ok_or_else(|| Error::ValueMismatch {
                    ty: ty.to_string(),
                    value: value.to_string(),
                })?;
            write_leb128_u64(out, position as u64);
            encode_value(env, &fields[position].ty, v, out)?;
        }
        (Type::Func(_), Value::Func(principal, method)) => {
            out.push(1);
            write_principal(out, principal);
            write_text(out, method);
        }
        (Type::Service(_), Value::Service(principal)) => write_principal(out, principal),
        _ => {
            return Err(Error::ValueMismatch {
                ty: ty.to_string(),
                value: value.to_string(),
            })
        }
    }
    Ok(())
}
