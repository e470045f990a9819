//! # Envelopes
//!
//! The two messages that cross the wire: a `Call` asking a node to invoke a
//! method on one of its remotes, and a `Reply` carrying the outcome back.
//!
//! ## Invariants
//! - A call carries a correlation id if and only if it needs a reply.
//!   `Invoke` cannot be built otherwise, and decoding rejects frames that try.
//! - A reply carries either a result or a fault, never both.
//! - Unknown header fields are skipped; a different protocol version is rejected.

use std::fmt;

use wirepack::Decoder;
use wirepack::Encoder;

use crate::codec::decode_fault;
use crate::codec::decode_types;
use crate::codec::decode_value;
use crate::codec::decode_values;
use crate::codec::encode_fault;
use crate::codec::encode_types;
use crate::codec::encode_value;
use crate::codec::encode_values;
use crate::codec::missing;
use crate::error::Error;
use crate::error::Fault;
use crate::error::Result;
use crate::value::TypeTag;
use crate::value::Value;

/// Version written into every frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Identity of a node in the session.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Links a call to the replies it produces.
///
/// `origin` distinguishes generators (one per node); `seq` counts within one.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct CorrelationId {
    pub origin: u64,
    pub seq: u64,
}

impl CorrelationId {
    pub fn new(origin: u64, seq: u64) -> Self {
        Self { origin, seq }
    }

    fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.list_begin()?;
        enc.u64(self.origin)?;
        enc.u64(self.seq)?;
        enc.list_end()?;
        Ok(())
    }

    fn decode(dec: &mut Decoder) -> Result<Self> {
        let mut parts = dec.list()?;
        let mut part = |name: &str| -> Result<u64> {
            let mut item = parts.next().ok_or_else(|| missing(name))??;
            Ok(item.u64()?)
        };
        let origin = part("id origin")?;
        let seq = part("id seq")?;
        if parts.next().is_some() {
            return Err(Error::ProtocolViolation("correlation id has extra parts".into()));
        }
        Ok(Self { origin, seq })
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.origin, self.seq)
    }
}

/// "Call this remote's method with these arguments."
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    remote_name: String,
    method_name: String,
    args: Vec<Value>,
    arg_types: Vec<TypeTag>,
}

impl MethodCall {
    /// Builds a call, checking every argument against its declared type.
    pub fn new(
        remote_name: impl Into<String>,
        method_name: impl Into<String>,
        args: Vec<Value>,
        arg_types: Vec<TypeTag>,
    ) -> Result<Self> {
        if args.len() != arg_types.len() {
            return Err(Error::ArgumentMismatch(format!(
                "{} values for {} declared types",
                args.len(),
                arg_types.len()
            )));
        }
        if let Some((i, (val, ty))) = args
            .iter()
            .zip(&arg_types)
            .enumerate()
            .find(|(_, (val, ty))| !ty.accepts(val))
        {
            return Err(Error::ArgumentMismatch(format!(
                "argument {} is {} but declared {}",
                i,
                val.kind(),
                ty
            )));
        }
        Ok(Self { remote_name: remote_name.into(), method_name: method_name.into(), args, arg_types })
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn arg_types(&self) -> &[TypeTag] {
        &self.arg_types
    }
}

/// A call on its way to a node: the method call plus routing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Invoke {
    id: Option<CorrelationId>,
    call: MethodCall,
}

impl Invoke {
    /// Builds an invoke, rejecting a `needs_reply` flag that disagrees with `id`.
    pub fn new(id: Option<CorrelationId>, needs_reply: bool, call: MethodCall) -> Result<Self> {
        match (needs_reply, id.is_some()) {
            (true, false) => Err(Error::InvariantViolation("needs a reply but has no correlation id")),
            (false, true) => Err(Error::InvariantViolation("has a correlation id but needs no reply")),
            _ => Ok(Self { id, call }),
        }
    }

    /// An invoke whose outcome is sent back under `id`.
    pub fn with_reply(id: CorrelationId, call: MethodCall) -> Self {
        Self { id: Some(id), call }
    }

    /// A fire-and-forget invoke.
    pub fn one_way(call: MethodCall) -> Self {
        Self { id: None, call }
    }

    pub fn id(&self) -> Option<CorrelationId> {
        self.id
    }

    pub fn needs_reply(&self) -> bool {
        self.id.is_some()
    }

    pub fn call(&self) -> &MethodCall {
        &self.call
    }
}

impl fmt::Display for Invoke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invoke {}.{}", self.call.remote_name, self.call.method_name)?;
        match self.id {
            Some(id) => write!(f, " [{}]", id),
            None => write!(f, " [one-way]"),
        }
    }
}

/// What running a call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Fault(Fault),
}

impl Outcome {
    pub fn into_result(self) -> std::result::Result<Value, Fault> {
        match self {
            Self::Result(v) => Ok(v),
            Self::Fault(f) => Err(f),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

impl From<std::result::Result<Value, Fault>> for Outcome {
    fn from(r: std::result::Result<Value, Fault>) -> Self {
        match r {
            Ok(v) => Self::Result(v),
            Err(f) => Self::Fault(f),
        }
    }
}

/// The outcome of an invoke, addressed by its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: CorrelationId,
    pub outcome: Outcome,
}

/// Top-level message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Call(Invoke),
    Reply(Reply),
}

impl Envelope {
    /// Encodes the envelope into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.finish()?)
    }

    /// Decodes exactly one envelope from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let envelope = Self::decode(&mut dec)?;
        dec.expect_end()?;
        Ok(envelope)
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            Self::Call(invoke) => encode_call(enc, invoke),
            Self::Reply(reply) => encode_reply(enc, reply),
        }
    }

    pub fn decode(dec: &mut Decoder) -> Result<Self> {
        let (kind, mut body) = dec.variant()?;
        let envelope = match kind {
            "Call" => Self::Call(decode_call(&mut body)?),
            "Reply" => Self::Reply(decode_reply(&mut body)?),
            other => return Err(Error::UnknownVariant(format!("top-level frame: {}", other))),
        };
        body.expect_end()?;
        Ok(envelope)
    }
}

fn encode_call(enc: &mut Encoder, invoke: &Invoke) -> Result<()> {
    let call = &invoke.call;
    enc.variant_begin("Call")?;
    enc.map_begin()?;

    enc.field("v", |e| e.u8(PROTOCOL_VERSION))?;
    enc.field("reply", |e| e.bool(invoke.needs_reply()))?;
    if let Some(id) = &invoke.id {
        enc.variant_begin("id")?;
        id.encode(enc)?;
        enc.variant_end()?;
    }
    enc.field("remote", |e| e.str(&call.remote_name))?;
    enc.field("method", |e| e.str(&call.method_name))?;

    enc.variant_begin("types")?;
    encode_types(enc, &call.arg_types)?;
    enc.variant_end()?;

    enc.variant_begin("args")?;
    encode_values(enc, &call.args)?;
    enc.variant_end()?;

    enc.map_end()?;
    enc.variant_end()?;
    Ok(())
}

fn decode_call(body: &mut Decoder) -> Result<Invoke> {
    let mut map = body.map()?;
    let mut version = None;
    let mut needs_reply = None;
    let mut id = None;
    let mut remote = None;
    let mut method = None;
    let mut types = None;
    let mut args = None;

    while let Some((key, mut val)) = map.next_entry()? {
        match key {
            "v" => version = Some(val.u8()?),
            "reply" => needs_reply = Some(val.bool()?),
            "id" => id = Some(CorrelationId::decode(&mut val)?),
            "remote" => remote = Some(val.str()?.to_string()),
            "method" => method = Some(val.str()?.to_string()),
            "types" => types = Some(decode_types(&mut val)?),
            "args" => args = Some(decode_values(&mut val)?),
            _ => val.skip()?,
        }
    }

    check_version(version)?;
    let args = args.ok_or_else(|| missing("args"))?;
    let types = types.ok_or_else(|| missing("types"))?;
    let call = MethodCall::new(
        remote.ok_or_else(|| missing("remote"))?,
        method.ok_or_else(|| missing("method"))?,
        args,
        types,
    )
    .map_err(|e| Error::ProtocolViolation(e.to_string()))?;

    Invoke::new(id, needs_reply.ok_or_else(|| missing("reply"))?, call)
}

fn encode_reply(enc: &mut Encoder, reply: &Reply) -> Result<()> {
    enc.variant_begin("Reply")?;
    enc.map_begin()?;

    enc.field("v", |e| e.u8(PROTOCOL_VERSION))?;
    enc.variant_begin("id")?;
    reply.id.encode(enc)?;
    enc.variant_end()?;

    enc.variant_begin("outcome")?;
    match &reply.outcome {
        Outcome::Result(value) => {
            enc.ok_begin()?;
            encode_value(enc, value)?;
        }
        Outcome::Fault(fault) => {
            enc.err_begin()?;
            encode_fault(enc, fault)?;
        }
    }
    enc.result_end()?;
    enc.variant_end()?;

    enc.map_end()?;
    enc.variant_end()?;
    Ok(())
}

fn decode_reply(body: &mut Decoder) -> Result<Reply> {
    let mut map = body.map()?;
    let mut version = None;
    let mut id = None;
    let mut outcome = None;

    while let Some((key, mut val)) = map.next_entry()? {
        match key {
            "v" => version = Some(val.u8()?),
            "id" => id = Some(CorrelationId::decode(&mut val)?),
            "outcome" => {
                outcome = Some(match val.result()? {
                    Ok(mut ok) => Outcome::Result(decode_value(&mut ok)?),
                    Err(mut err) => Outcome::Fault(decode_fault(&mut err)?),
                });
            }
            _ => val.skip()?,
        }
    }

    check_version(version)?;
    Ok(Reply {
        id: id.ok_or_else(|| missing("id"))?,
        outcome: outcome.ok_or_else(|| missing("outcome"))?,
    })
}

fn check_version(version: Option<u8>) -> Result<()> {
    match version {
        Some(PROTOCOL_VERSION) => Ok(()),
        Some(other) => Err(Error::UnsupportedVersion(other)),
        None => Err(missing("version")),
    }
}

/// Reads just the correlation id of a reply frame.
///
/// Used to fail a pending call when the rest of its reply cannot be decoded.
pub fn peek_reply_id(bytes: &[u8]) -> Result<CorrelationId> {
    peek_id(bytes, "Reply")
}

/// Reads just the correlation id of a call frame that expects a reply.
///
/// Lets a receiver answer a call it cannot decode with a fault instead of
/// leaving the caller to time out. One-way calls have no id and fail here.
pub fn peek_call_id(bytes: &[u8]) -> Result<CorrelationId> {
    peek_id(bytes, "Call")
}

fn peek_id(bytes: &[u8], frame: &str) -> Result<CorrelationId> {
    let mut dec = Decoder::new(bytes);
    let (kind, mut body) = dec.variant()?;
    if kind != frame {
        return Err(Error::ProtocolViolation(format!("{} frame is not a {} frame", kind, frame)));
    }
    let mut map = body.map()?;
    while let Some((key, mut val)) = map.next_entry()? {
        if key == "id" {
            return CorrelationId::decode(&mut val);
        }
        val.skip()?;
    }
    Err(missing("id"))
}
