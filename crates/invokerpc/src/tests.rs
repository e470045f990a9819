use wirepack::Encoder;

use crate::*;

fn add_call() -> MethodCall {
    MethodCall::new("Foo", "bar", vec![Value::I32(1), Value::I32(2)], vec![TypeTag::I32, TypeTag::I32])
        .expect("valid call")
}

fn assert_roundtrip(envelope: Envelope) {
    let bytes = envelope.to_bytes().expect("encoding failed");
    let decoded = Envelope::from_bytes(&bytes).expect("decoding failed");
    assert_eq!(envelope, decoded);
}

// ============================================================================
//  ROUND TRIPS
// ============================================================================

#[test]
fn test_call_with_reply_roundtrip() {
    let id = CorrelationId::new(0xDEAD_BEEF, 7);
    assert_roundtrip(Envelope::Call(Invoke::with_reply(id, add_call())));
}

#[test]
fn test_one_way_call_roundtrip() {
    assert_roundtrip(Envelope::Call(Invoke::one_way(add_call())));
}

#[test]
fn test_call_with_rich_arguments_roundtrip() {
    let territory = Value::record([
        ("name", Value::str("Karelia S.S.R.")),
        ("production", Value::I32(2)),
        ("units", Value::List(vec![Value::str("infantry"), Value::str("armour")])),
    ]);
    let call = MethodCall::new(
        "game.delegate.battle",
        "fight",
        vec![territory, Value::Null, Value::Bytes(vec![1, 2, 3]), Value::F64(0.5), Value::I64(-9)],
        vec![
            TypeTag::named("Territory"),
            TypeTag::optional(TypeTag::Str),
            TypeTag::Bytes,
            TypeTag::F64,
            TypeTag::I64,
        ],
    )
    .expect("valid call");
    assert_roundtrip(Envelope::Call(Invoke::with_reply(CorrelationId::new(1, 2), call)));
}

#[test]
fn test_reply_result_roundtrip() {
    assert_roundtrip(Envelope::Reply(Reply {
        id: CorrelationId::new(3, 4),
        outcome: Outcome::Result(Value::I32(3)),
    }));
}

#[test]
fn test_reply_faults_roundtrip() {
    let faults = [
        Fault::UnknownRemote { name: "Foo".into() },
        Fault::NoMatchingMethod {
            remote: "Foo".into(),
            method: "bar".into(),
            arg_types: vec![TypeTag::list(TypeTag::I32), TypeTag::named("Unit")],
        },
        Fault::Execution { message: "not enough PUs".into() },
        Fault::RecipientGone { node: NodeId(4) },
        Fault::Protocol { message: "bad frame".into() },
    ];
    for fault in faults {
        assert_roundtrip(Envelope::Reply(Reply {
            id: CorrelationId::new(9, 9),
            outcome: Outcome::Fault(fault),
        }));
    }
}

// ============================================================================
//  INVARIANTS
// ============================================================================

#[test]
fn test_invoke_rejects_reply_without_id() {
    let err = Invoke::new(None, true, add_call()).unwrap_err();
    assert!(matches!(err, Error::InvariantViolation(_)));
}

#[test]
fn test_invoke_rejects_id_without_reply() {
    let err = Invoke::new(Some(CorrelationId::new(1, 1)), false, add_call()).unwrap_err();
    assert!(matches!(err, Error::InvariantViolation(_)));
}

#[test]
fn test_invoke_accepts_consistent_shapes() {
    let with = Invoke::new(Some(CorrelationId::new(1, 1)), true, add_call()).unwrap();
    assert!(with.needs_reply());
    let without = Invoke::new(None, false, add_call()).unwrap();
    assert!(!without.needs_reply());
    assert_eq!(without.to_string(), "invoke Foo.bar [one-way]");
}

#[test]
fn test_method_call_checks_arguments() {
    let err = MethodCall::new("Foo", "bar", vec![Value::I32(1)], vec![]).unwrap_err();
    assert!(matches!(err, Error::ArgumentMismatch(_)));

    let err = MethodCall::new("Foo", "bar", vec![Value::Null], vec![TypeTag::I32]).unwrap_err();
    assert!(matches!(err, Error::ArgumentMismatch(_)));

    MethodCall::new("Foo", "bar", vec![Value::Null], vec![TypeTag::Str]).expect("null string is fine");
}

#[test]
fn test_type_tag_acceptance() {
    assert!(TypeTag::list(TypeTag::I32).accepts(&Value::List(vec![Value::I32(1)])));
    assert!(!TypeTag::list(TypeTag::I32).accepts(&Value::List(vec![Value::I64(1)])));
    assert!(TypeTag::optional(TypeTag::I32).accepts(&Value::I32(1)));
    assert!(TypeTag::optional(TypeTag::I32).accepts(&Value::Null));
    assert!(TypeTag::named("Territory").accepts(&Value::record([("name", Value::str("x"))])));
    assert!(!TypeTag::Bool.accepts(&Value::Null));
}

// ============================================================================
//  MALFORMED FRAMES
// ============================================================================

#[test]
fn test_decode_rejects_reply_flag_without_id() -> Result<()> {
    let mut enc = Encoder::new();
    enc.variant_begin("Call")?;
    enc.map_begin()?;
    enc.field("v", |e| e.u8(PROTOCOL_VERSION))?;
    enc.field("reply", |e| e.bool(true))?;
    enc.field("remote", |e| e.str("Foo"))?;
    enc.field("method", |e| e.str("bar"))?;
    enc.field("types", |e| { e.list_begin()?; e.list_end() })?;
    enc.field("args", |e| { e.list_begin()?; e.list_end() })?;
    enc.map_end()?;
    enc.variant_end()?;
    let bytes = enc.finish()?;

    assert!(matches!(Envelope::from_bytes(&bytes), Err(Error::InvariantViolation(_))));
    Ok(())
}

#[test]
fn test_decode_skips_unknown_fields() -> Result<()> {
    let mut enc = Encoder::new();
    enc.variant_begin("Reply")?;
    enc.map_begin()?;
    enc.field("trace", |e| e.str("ignored"))?;
    enc.field("v", |e| e.u8(PROTOCOL_VERSION))?;
    enc.field("id", |e| { e.list_begin()?; e.u64(5)?; e.u64(6)?; e.list_end() })?;
    enc.field("outcome", |e| { e.ok_begin()?; e.unit()?; e.result_end() })?;
    enc.map_end()?;
    enc.variant_end()?;
    let bytes = enc.finish()?;

    let envelope = Envelope::from_bytes(&bytes)?;
    assert_eq!(
        envelope,
        Envelope::Reply(Reply { id: CorrelationId::new(5, 6), outcome: Outcome::Result(Value::Unit) })
    );
    Ok(())
}

#[test]
fn test_decode_rejects_other_versions() -> Result<()> {
    let mut enc = Encoder::new();
    enc.variant_begin("Reply")?;
    enc.map_begin()?;
    enc.field("v", |e| e.u8(PROTOCOL_VERSION + 1))?;
    enc.field("id", |e| { e.list_begin()?; e.u64(5)?; e.u64(6)?; e.list_end() })?;
    enc.field("outcome", |e| { e.ok_begin()?; e.unit()?; e.result_end() })?;
    enc.map_end()?;
    enc.variant_end()?;
    let bytes = enc.finish()?;

    assert_eq!(Envelope::from_bytes(&bytes), Err(Error::UnsupportedVersion(PROTOCOL_VERSION + 1)));
    Ok(())
}

#[test]
fn test_decode_rejects_garbage() {
    assert!(Envelope::from_bytes(&[0xFF, 0xFF, 0xFF]).is_err());
    assert!(Envelope::from_bytes(&[]).is_err());
}

#[test]
fn test_decode_rejects_trailing_bytes() {
    let mut bytes = Envelope::Call(Invoke::one_way(add_call())).to_bytes().unwrap();
    bytes.push(wirepack::Tag::Unit as u8);
    assert!(matches!(
        Envelope::from_bytes(&bytes),
        Err(Error::Serialization(wirepack::Error::TrailingBytes(1)))
    ));
}

#[test]
fn test_recursion_limit() {
    let mut deep = Value::I32(0);
    for _ in 0..100 {
        deep = Value::List(vec![deep]);
    }
    let mut enc = Encoder::new();
    assert_eq!(codec::encode_value(&mut enc, &deep), Err(Error::RecursionLimitExceeded));
}

#[test]
fn test_peek_reply_id() {
    let id = CorrelationId::new(11, 12);
    let bytes = Envelope::Reply(Reply { id, outcome: Outcome::Result(Value::Unit) })
        .to_bytes()
        .unwrap();
    assert_eq!(peek_reply_id(&bytes), Ok(id));

    let call = Envelope::Call(Invoke::one_way(add_call())).to_bytes().unwrap();
    assert!(peek_reply_id(&call).is_err());
}

#[test]
fn test_peek_call_id_of_undecodable_call() -> Result<()> {
    let mut enc = Encoder::new();
    enc.variant_begin("Call")?;
    enc.map_begin()?;
    enc.field("v", |e| e.u8(PROTOCOL_VERSION))?;
    enc.field("reply", |e| e.bool(true))?;
    enc.field("id", |e| { e.list_begin()?; e.u64(21)?; e.u64(22)?; e.list_end() })?;
    enc.field("remote", |e| e.str("Foo"))?;
    enc.field("method", |e| e.str("bar"))?;
    enc.field("types", |e| {
        e.list_begin()?;
        e.variant_begin("quaternion")?;
        e.unit()?;
        e.variant_end()?;
        e.list_end()
    })?;
    enc.field("args", |e| { e.list_begin()?; e.unit()?; e.list_end() })?;
    enc.map_end()?;
    enc.variant_end()?;
    let bytes = enc.finish()?;

    assert!(matches!(Envelope::from_bytes(&bytes), Err(Error::UnknownVariant(_))));
    assert_eq!(peek_call_id(&bytes), Ok(CorrelationId::new(21, 22)));
    Ok(())
}

#[test]
fn test_peek_call_id_needs_a_reply_call() {
    let one_way = Envelope::Call(Invoke::one_way(add_call())).to_bytes().unwrap();
    assert!(peek_call_id(&one_way).is_err());

    let reply = Envelope::Reply(Reply { id: CorrelationId::new(1, 1), outcome: Outcome::Result(Value::Unit) })
        .to_bytes()
        .unwrap();
    assert!(peek_call_id(&reply).is_err());
}

#[test]
fn test_float_results_roundtrip_by_bits() {
    for f in [f64::NAN, -0.0, f64::INFINITY] {
        assert_roundtrip(Envelope::Reply(Reply { id: CorrelationId::new(8, 9), outcome: Outcome::Result(Value::F64(f)) }));
    }
    assert_eq!(Value::F64(f64::NAN), Value::F64(f64::NAN));
    assert_ne!(Value::F64(0.0), Value::F64(-0.0));
}

#[test]
fn test_value_accessors() {
    let player = Value::record([
        ("name", Value::str("Germans")),
        ("pus", Value::I64(40)),
        ("ai", Value::Bool(false)),
    ]);
    assert_eq!(player.field("name").and_then(Value::as_str), Some("Germans"));
    assert_eq!(player.field("pus").and_then(Value::as_i64), Some(40));
    assert_eq!(player.field("ai").and_then(Value::as_bool), Some(false));
    assert_eq!(player.field("pus").and_then(Value::as_i32), None);
    assert!(player.field("capital").is_none());
    assert!(Value::I32(1).field("name").is_none());
}

#[test]
fn test_fault_display() {
    let fault = Fault::NoMatchingMethod {
        remote: "Foo".into(),
        method: "bar".into(),
        arg_types: vec![TypeTag::I32, TypeTag::optional(TypeTag::Str)],
    };
    assert_eq!(fault.to_string(), "no method Foo.bar(i32, opt<str>)");
    assert_eq!(
        Fault::RecipientGone { node: NodeId(2) }.to_string(),
        "node-2 disconnected before replying"
    );
}
