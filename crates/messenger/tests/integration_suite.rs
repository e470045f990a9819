//! End-to-end tests over the in-memory hub.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use invokerpc::Envelope;
use invokerpc::Fault;
use invokerpc::MethodCall;
use invokerpc::NodeId;
use invokerpc::Outcome;
use invokerpc::Reply;
use invokerpc::TypeTag;
use invokerpc::Value;

use messenger::CallError;
use messenger::MemoryHub;
use messenger::MessengerConfig;
use messenger::RemoteObject;
use messenger::UnifiedMessenger;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> MessengerConfig {
    MessengerConfig::default().with_call_timeout(Duration::from_secs(10))
}

fn foo() -> RemoteObject {
    RemoteObject::builder()
        .method("bar", &[TypeTag::I32, TypeTag::I32], |args| {
            let sum = args[0].as_i32().unwrap_or_default() + args[1].as_i32().unwrap_or_default();
            Ok(Value::I32(sum))
        })
        .method("bar", &[TypeTag::Str], |args| Ok(Value::Bool(args[0].is_null())))
        .method("fail", &[], |_| anyhow::bail!("not enough wood"))
        .method("explode", &[], |_| panic!("kaboom"))
        .build()
        .unwrap()
}

fn bar(a: i32, b: i32) -> MethodCall {
    MethodCall::new("Foo", "bar", vec![Value::I32(a), Value::I32(b)], vec![TypeTag::I32, TypeTag::I32]).unwrap()
}

fn nullary(method: &str) -> MethodCall {
    MethodCall::new("Foo", method, vec![], vec![]).unwrap()
}

/// Polls `cond` until it holds or a second has passed.
async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(1);
    while !cond() {
        assert!(Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

// --- Point-to-point ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_point_to_point_call() {
    init_tracing();
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.spawn_node(config());
    b.registry().register("Foo", foo(), None).unwrap();

    let value = a.call(b.node(), bar(1, 2)).await.unwrap();
    assert_eq!(value, Value::I32(3));
    assert_eq!(a.outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_null_argument_picks_typed_overload() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.spawn_node(config());
    b.registry().register("Foo", foo(), None).unwrap();

    let call = MethodCall::new("Foo", "bar", vec![Value::Null], vec![TypeTag::Str]).unwrap();
    assert_eq!(a.call(b.node(), call).await.unwrap(), Value::Bool(true));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_remote_and_method() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.spawn_node(config());
    b.registry().register("Foo", foo(), None).unwrap();

    let call = MethodCall::new("Ghost", "bar", vec![], vec![]).unwrap();
    let err = a.call(b.node(), call).await.unwrap_err();
    assert_eq!(err, CallError::Remote(Fault::UnknownRemote { name: "Ghost".into() }));

    let call = MethodCall::new("Foo", "bar", vec![Value::I64(1)], vec![TypeTag::I64]).unwrap();
    let err = a.call(b.node(), call).await.unwrap_err();
    assert!(matches!(err, CallError::Remote(Fault::NoMatchingMethod { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_faults_do_not_stop_dispatch() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.spawn_node(config());
    b.registry().register("Foo", foo(), None).unwrap();

    match a.call(b.node(), nullary("fail")).await {
        Err(CallError::Remote(Fault::Execution { message })) => assert!(message.contains("not enough wood")),
        other => panic!("expected execution fault, got {:?}", other),
    }
    match a.call(b.node(), nullary("explode")).await {
        Err(CallError::Remote(Fault::Execution { message })) => assert!(message.contains("kaboom")),
        other => panic!("expected execution fault, got {:?}", other),
    }
    assert_eq!(a.call(b.node(), bar(20, 22)).await.unwrap(), Value::I32(42));
}

// --- Broadcast ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_broadcast_with_member_disconnected() {
    init_tracing();
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.add_mute_node();
    let c = hub.spawn_node(config());
    let d = hub.spawn_node(config());
    for node in [&c, &d] {
        node.registry().register("Foo", foo(), Some("players")).unwrap();
    }
    for member in [b, c.node(), d.node()] {
        a.registry().join("players", member);
    }

    let started = Instant::now();
    let gather = {
        let a = a.clone();
        tokio::spawn(async move { a.broadcast("players", bar(1, 2)).await })
    };

    eventually(|| !hub.received_by(b).is_empty()).await;
    hub.disconnect(b);

    let gathered = gather.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(gathered.len(), 3);
    assert_eq!(gathered[&c.node()], Outcome::Result(Value::I32(3)));
    assert_eq!(gathered[&d.node()], Outcome::Result(Value::I32(3)));
    assert_eq!(gathered[&b], Outcome::Fault(Fault::RecipientGone { node: b }));
    assert!(a.registry().members_of("players").iter().all(|n| *n != b));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_broadcast_includes_local_member() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.spawn_node(config());
    a.registry().register("Foo", foo(), Some("players")).unwrap();
    b.registry().register("Foo", foo(), Some("players")).unwrap();
    a.registry().join("players", b.node());

    let gathered = a.broadcast("players", bar(2, 3)).await.unwrap();
    assert_eq!(gathered.len(), 2);
    assert!(gathered.values().all(|o| *o == Outcome::Result(Value::I32(5))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_broadcast_one_way_reaches_members() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.add_mute_node();
    let c = hub.add_mute_node();
    a.registry().join("spectators", b);
    a.registry().join("spectators", c);

    a.broadcast_one_way("spectators", bar(1, 1)).await.unwrap();
    eventually(|| hub.received_by(b).len() == 1 && hub.received_by(c).len() == 1).await;
    assert_eq!(a.outstanding(), 0);
}

// --- Timeouts and disconnects ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_then_late_reply_is_dropped() {
    init_tracing();
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.add_mute_node();

    let started = Instant::now();
    let err = a.call_with_timeout(b, bar(1, 2), Duration::from_millis(50)).await.unwrap_err();
    let elapsed = started.elapsed();
    assert!(matches!(err, CallError::Timeout(_)), "got {:?}", err);
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed <= Duration::from_millis(100), "took {:?}", elapsed);
    assert_eq!(a.outstanding(), 0);

    // Answer the call now that nobody is waiting for it.
    let (from, bytes) = hub.received_by(b).remove(0);
    assert_eq!(from, a.node());
    let Envelope::Call(invoke) = Envelope::from_bytes(&bytes).unwrap() else {
        panic!("mute node should have received a call");
    };
    let id = invoke.id().unwrap();
    let late = Envelope::Reply(Reply { id, outcome: Outcome::Result(Value::I32(3)) });
    assert!(hub.inject(b, a.node(), late.to_bytes().unwrap()));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(a.outstanding(), 0);
    assert!(hub.violations().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disconnect_fails_point_to_point_call() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.add_mute_node();

    let call = {
        let a = a.clone();
        tokio::spawn(async move { a.call(b, bar(1, 2)).await })
    };
    eventually(|| !hub.received_by(b).is_empty()).await;
    hub.disconnect(b);

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err, CallError::Remote(Fault::RecipientGone { node: b }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_call_to_unknown_node() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());

    let err = a.call(NodeId(999), bar(1, 2)).await.unwrap_err();
    assert_eq!(err, CallError::Remote(Fault::RecipientGone { node: NodeId(999) }));
}

// --- Ordering and reentrancy ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_way_calls_keep_sender_order() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.spawn_node(config());

    let log = Arc::new(Mutex::new(Vec::new()));
    let object = {
        let push_log = log.clone();
        let len_log = log.clone();
        RemoteObject::builder()
            .method("push", &[TypeTag::I32], move |args| {
                push_log.lock().unwrap().push(args[0].as_i32().unwrap());
                Ok(Value::Unit)
            })
            .method("len", &[], move |_| Ok(Value::I64(len_log.lock().unwrap().len() as i64)))
            .build()
            .unwrap()
    };
    b.registry().register("Log", object, None).unwrap();

    for i in 0..50 {
        let call = MethodCall::new("Log", "push", vec![Value::I32(i)], vec![TypeTag::I32]).unwrap();
        a.send(b.node(), call).await.unwrap();
    }
    let len = a.call(b.node(), MethodCall::new("Log", "len", vec![], vec![]).unwrap()).await.unwrap();

    assert_eq!(len, Value::I64(50));
    assert_eq!(*log.lock().unwrap(), (0..50).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_call_back_into_waiting_caller() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.spawn_node(config());
    a.registry().register("Foo", foo(), None).unwrap();

    // B answers by asking A, while A is still waiting on B.
    let relay = {
        let b = b.clone();
        let a_node = a.node();
        RemoteObject::builder()
            .method("relay", &[], move |_| {
                let handle = tokio::runtime::Handle::current();
                Ok(handle.block_on(b.call(a_node, bar(4, 5)))?)
            })
            .build()
            .unwrap()
    };
    b.registry().register("Relay", relay, None).unwrap();

    let call = MethodCall::new("Relay", "relay", vec![], vec![]).unwrap();
    let value = a.call_with_timeout(b.node(), call, Duration::from_secs(2)).await.unwrap();
    assert_eq!(value, Value::I32(9));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nested_local_call() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    a.registry().register("Foo", foo(), None).unwrap();

    // A local handler calling another local remote through the messenger.
    let relay = {
        let a = a.clone();
        RemoteObject::builder()
            .method("relay", &[], move |_| {
                let handle = tokio::runtime::Handle::current();
                Ok(handle.block_on(a.call(a.node(), bar(4, 5)))?)
            })
            .build()
            .unwrap()
    };
    a.registry().register("Relay", relay, None).unwrap();

    let call = MethodCall::new("Relay", "relay", vec![], vec![]).unwrap();
    let value = a.call_with_timeout(a.node(), call, Duration::from_secs(2)).await.unwrap();
    assert_eq!(value, Value::I32(9));
    assert_eq!(a.outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_call_chain_bouncing_between_nodes() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.spawn_node(config());
    b.registry().register("Foo", foo(), None).unwrap();

    // A asks B.first, which asks A.second, which asks B.Foo.bar.
    let first = {
        let b = b.clone();
        let a_node = a.node();
        RemoteObject::builder()
            .method("first", &[], move |_| {
                let call = MethodCall::new("Chain", "second", vec![], vec![])?;
                Ok(tokio::runtime::Handle::current().block_on(b.call(a_node, call))?)
            })
            .build()
            .unwrap()
    };
    let second = {
        let a = a.clone();
        let b_node = b.node();
        RemoteObject::builder()
            .method("second", &[], move |_| {
                Ok(tokio::runtime::Handle::current().block_on(a.call(b_node, bar(6, 7)))?)
            })
            .build()
            .unwrap()
    };
    b.registry().register("Chain", first, None).unwrap();
    a.registry().register("Chain", second, None).unwrap();

    let call = MethodCall::new("Chain", "first", vec![], vec![]).unwrap();
    let value = a.call_with_timeout(b.node(), call, Duration::from_secs(2)).await.unwrap();
    assert_eq!(value, Value::I32(13));
}

// --- Protocol errors ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_malformed_bytes_are_reported() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.spawn_node(config());
    b.registry().register("Foo", foo(), None).unwrap();

    assert!(hub.inject(a.node(), b.node(), vec![0x99, 0x01, 0x02]));
    eventually(|| !hub.violations().is_empty()).await;

    let violation = &hub.violations()[0];
    assert_eq!(violation.reporter, b.node());
    assert_eq!(violation.offender, a.node());

    assert_eq!(a.call(b.node(), bar(1, 1)).await.unwrap(), Value::I32(2));
}

// --- Session lifetime ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unregistered_remote_is_unknown() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.spawn_node(config());
    b.registry().register("Foo", foo(), None).unwrap();
    assert_eq!(a.call(b.node(), bar(1, 2)).await.unwrap(), Value::I32(3));

    b.registry().unregister("Foo");
    let err = a.call(b.node(), bar(1, 2)).await.unwrap_err();
    assert_eq!(err, CallError::Remote(Fault::UnknownRemote { name: "Foo".into() }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_releases_callers() {
    let hub = MemoryHub::new();
    let a = hub.spawn_node(config());
    let b = hub.add_mute_node();

    let call = {
        let a: UnifiedMessenger = a.clone();
        tokio::spawn(async move { a.call(b, bar(1, 2)).await })
    };
    eventually(|| a.outstanding() == 1).await;
    a.shutdown();

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err, CallError::Remote(Fault::RecipientGone { node: b }));
}
