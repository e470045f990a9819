//! # Codec
//!
//! Translation between `Value` / `TypeTag` / `Fault` and wirepack.
//!
//! ## Invariants
//! - **Recursion Safety**: nested values and tags are bounded by `MAX_RECURSION_DEPTH`.
//! - **Self-description**: values decode without a schema; tags are checked separately.

use wirepack::Decoder;
use wirepack::Encoder;
use wirepack::Tag;

use crate::envelope::NodeId;
use crate::error::Error;
use crate::error::Fault;
use crate::error::Result;
use crate::value::TypeTag;
use crate::value::Value;

/// The maximum nesting depth for values and type tags.
const MAX_RECURSION_DEPTH: usize = 64;

/// Encodes a value into the encoder stream.
pub fn encode_value(enc: &mut Encoder, val: &Value) -> Result<()> {
    encode_value_impl(enc, val, 0)
}

fn encode_value_impl(enc: &mut Encoder, val: &Value, depth: usize) -> Result<()> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    match val {
        Value::Null => enc.null()?,
        Value::Unit => enc.unit()?,
        Value::Bool(b) => enc.bool(*b)?,
        Value::I32(v) => enc.s32(*v)?,
        Value::I64(v) => enc.s64(*v)?,
        Value::F64(v) => enc.f64(*v)?,
        Value::Str(s) => enc.str(s)?,
        Value::Bytes(b) => enc.bytes(b)?,
        Value::List(items) => {
            enc.list_begin()?;
            for item in items {
                encode_value_impl(enc, item, depth + 1)?;
            }
            enc.list_end()?;
        }
        Value::Record(fields) => {
            enc.map_begin()?;
            for (name, field) in fields {
                enc.variant_begin(name)?;
                encode_value_impl(enc, field, depth + 1)?;
                enc.variant_end()?;
            }
            enc.map_end()?;
        }
    }
    Ok(())
}

/// Decodes one self-describing value.
pub fn decode_value(dec: &mut Decoder) -> Result<Value> {
    decode_value_impl(dec, 0)
}

fn decode_value_impl(dec: &mut Decoder, depth: usize) -> Result<Value> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    let value = match dec.peek_tag()? {
        Tag::Null => { dec.null()?; Value::Null }
        Tag::Unit => { dec.unit()?; Value::Unit }
        Tag::True | Tag::False => Value::Bool(dec.bool()?),
        Tag::S32 => Value::I32(dec.s32()?),
        Tag::S64 => Value::I64(dec.s64()?),
        Tag::F64 => Value::F64(dec.f64()?),
        Tag::Str => Value::Str(dec.str()?.to_string()),
        Tag::Bytes => Value::Bytes(dec.bytes()?.to_vec()),
        Tag::List => {
            let mut items = Vec::new();
            for item in dec.list()? {
                items.push(decode_value_impl(&mut item?, depth + 1)?);
            }
            Value::List(items)
        }
        Tag::Map => {
            let mut map = dec.map()?;
            let mut fields = Vec::new();
            while let Some((name, mut field)) = map.next_entry()? {
                fields.push((name.to_string(), decode_value_impl(&mut field, depth + 1)?));
            }
            Value::Record(fields)
        }
        other => {
            return Err(Error::ProtocolViolation(format!("{:?} does not start a value", other)));
        }
    };
    Ok(value)
}

/// Encodes a list of values.
pub fn encode_values(enc: &mut Encoder, vals: &[Value]) -> Result<()> {
    enc.list_begin()?;
    for val in vals {
        encode_value(enc, val)?;
    }
    enc.list_end()?;
    Ok(())
}

/// Decodes a list of values.
pub fn decode_values(dec: &mut Decoder) -> Result<Vec<Value>> {
    let mut vals = Vec::new();
    for item in dec.list()? {
        vals.push(decode_value(&mut item?)?);
    }
    Ok(vals)
}

// ============================================================================
//  TYPE TAGS
// ============================================================================

pub fn encode_type(enc: &mut Encoder, ty: &TypeTag) -> Result<()> {
    encode_type_impl(enc, ty, 0)
}

fn encode_type_impl(enc: &mut Encoder, ty: &TypeTag, depth: usize) -> Result<()> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    let simple = match ty {
        TypeTag::Unit => "unit",
        TypeTag::Bool => "bool",
        TypeTag::I32 => "i32",
        TypeTag::I64 => "i64",
        TypeTag::F64 => "f64",
        TypeTag::Str => "str",
        TypeTag::Bytes => "bytes",
        TypeTag::List(inner) => {
            enc.variant_begin("list")?;
            encode_type_impl(enc, inner, depth + 1)?;
            enc.variant_end()?;
            return Ok(());
        }
        TypeTag::Optional(inner) => {
            enc.variant_begin("opt")?;
            encode_type_impl(enc, inner, depth + 1)?;
            enc.variant_end()?;
            return Ok(());
        }
        TypeTag::Named(name) => {
            enc.variant_begin("named")?;
            enc.str(name)?;
            enc.variant_end()?;
            return Ok(());
        }
    };
    enc.variant_begin(simple)?;
    enc.unit()?;
    enc.variant_end()?;
    Ok(())
}

pub fn decode_type(dec: &mut Decoder) -> Result<TypeTag> {
    decode_type_impl(dec, 0)
}

fn decode_type_impl(dec: &mut Decoder, depth: usize) -> Result<TypeTag> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    let (name, mut body) = dec.variant()?;
    let ty = match name {
        "list" => TypeTag::List(Box::new(decode_type_impl(&mut body, depth + 1)?)),
        "opt" => TypeTag::Optional(Box::new(decode_type_impl(&mut body, depth + 1)?)),
        "named" => TypeTag::Named(body.str()?.to_string()),
        simple => {
            body.unit()?;
            match simple {
                "unit" => TypeTag::Unit,
                "bool" => TypeTag::Bool,
                "i32" => TypeTag::I32,
                "i64" => TypeTag::I64,
                "f64" => TypeTag::F64,
                "str" => TypeTag::Str,
                "bytes" => TypeTag::Bytes,
                other => return Err(Error::UnknownVariant(format!("type tag: {}", other))),
            }
        }
    };
    body.expect_end()?;
    Ok(ty)
}

pub fn encode_types(enc: &mut Encoder, types: &[TypeTag]) -> Result<()> {
    enc.list_begin()?;
    for ty in types {
        encode_type(enc, ty)?;
    }
    enc.list_end()?;
    Ok(())
}

pub fn decode_types(dec: &mut Decoder) -> Result<Vec<TypeTag>> {
    let mut types = Vec::new();
    for item in dec.list()? {
        types.push(decode_type(&mut item?)?);
    }
    Ok(types)
}

// ============================================================================
//  FAULTS
// ============================================================================

pub fn encode_fault(enc: &mut Encoder, fault: &Fault) -> Result<()> {
    enc.variant_begin(fault.as_tag())?;
    match fault {
        Fault::UnknownRemote { name } => enc.str(name)?,
        Fault::NoMatchingMethod { remote, method, arg_types } => {
            enc.map_begin()?;
            enc.field("remote", |e| e.str(remote))?;
            enc.field("method", |e| e.str(method))?;
            enc.variant_begin("types")?;
            encode_types(enc, arg_types)?;
            enc.variant_end()?;
            enc.map_end()?;
        }
        Fault::Execution { message } => enc.str(message)?,
        Fault::RecipientGone { node } => enc.u64(node.0)?,
        Fault::Protocol { message } => enc.str(message)?,
    }
    enc.variant_end()?;
    Ok(())
}

pub fn decode_fault(dec: &mut Decoder) -> Result<Fault> {
    let (kind, mut body) = dec.variant()?;
    let fault = match kind {
        "UnknownRemote" => Fault::UnknownRemote { name: body.str()?.to_string() },
        "NoMatchingMethod" => {
            let mut map = body.map()?;
            let mut remote = None;
            let mut method = None;
            let mut arg_types = None;
            while let Some((key, mut val)) = map.next_entry()? {
                match key {
                    "remote" => remote = Some(val.str()?.to_string()),
                    "method" => method = Some(val.str()?.to_string()),
                    "types" => arg_types = Some(decode_types(&mut val)?),
                    _ => val.skip()?,
                }
            }
            Fault::NoMatchingMethod {
                remote: remote.ok_or_else(|| missing("remote"))?,
                method: method.ok_or_else(|| missing("method"))?,
                arg_types: arg_types.ok_or_else(|| missing("types"))?,
            }
        }
        "Execution" => Fault::Execution { message: body.str()?.to_string() },
        "RecipientGone" => Fault::RecipientGone { node: NodeId(body.u64()?) },
        "Protocol" => Fault::Protocol { message: body.str()?.to_string() },
        other => return Err(Error::UnknownVariant(format!("fault: {}", other))),
    };
    Ok(fault)
}

pub(crate) fn missing(field: &str) -> Error {
    Error::ProtocolViolation(format!("missing {}", field))
}
