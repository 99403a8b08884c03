//! Black-box tests for the eight concrete scenarios of spec.md §8, each run
//! over a real pair of in-process endpoints (`duplex_rpc::endpoint::local_pair`)
//! with one side exposing a root and the other wrapping it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use duplex_rpc::{endpoint, expose, wrap, CallError, ConnectOptions, Exposable, RemoteError, Value};

/// An [`Exposable`] built from a closure, so each test can describe its
/// root object's methods inline instead of naming a one-off struct.
struct Service<F>(F)
where
    F: Fn(Option<&str>, Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> + Send + Sync + 'static;

impl<F> Exposable for Service<F>
where
    F: Fn(Option<&str>, Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> + Send + Sync + 'static,
{
    fn call(&self, method: Option<&str>, args: Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> {
        (self.0)(method, args)
    }
}

fn service<F>(f: F) -> Arc<Service<F>>
where
    F: Fn(Option<&str>, Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> + Send + Sync + 'static,
{
    Arc::new(Service(f))
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Scenario 1: `{ add(a,b) => a+b }`; `remote.add(2,3)` resolves to `5`.
#[tokio::test]
async fn arithmetic() {
    init_logging();
    let (left, right) = endpoint::local_pair();
    let root = service(|method, args| {
        Box::pin(async move {
            match method {
                Some("add") => {
                    let mut it = args.into_iter();
                    match (it.next(), it.next()) {
                        (Some(Value::Number(a)), Some(Value::Number(b))) => Ok(Value::Number(a + b)),
                        _ => Err(RemoteError::type_error("add expects two numbers")),
                    }
                }
                _ => Err(RemoteError::type_error("no such method")),
            }
        })
    });
    let _server = expose(root, left, ConnectOptions::default());
    let (_client, proxy) = wrap(right, ConnectOptions::default()).await.unwrap();

    let result = proxy.call(Some("add"), vec![Value::Number(2.0), Value::Number(3.0)]).await.unwrap();
    assert!(matches!(result, Value::Number(n) if n == 5.0));
}

/// Scenario 2: `{ boom(){ throw new Error('x') } }`; `remote.boom()` rejects
/// with an error whose message is `'x'`.
#[tokio::test]
async fn error_propagation() {
    init_logging();
    let (left, right) = endpoint::local_pair();
    let root = service(|method, _args| {
        Box::pin(async move {
            match method {
                Some("boom") => Err(RemoteError::new("x")),
                _ => Err(RemoteError::type_error("no such method")),
            }
        })
    });
    let _server = expose(root, left, ConnectOptions::default());
    let (_client, proxy) = wrap(right, ConnectOptions::default()).await.unwrap();

    let err = proxy.call(Some("boom"), vec![]).await.unwrap_err();
    match err {
        CallError::Remote(e) => assert_eq!(e.message, "x"),
        other => panic!("expected a remote error, got {other:?}"),
    }
}

/// Scenario 3: `{ apply(fn, v){ return fn(v) } }`; calling
/// `remote.apply(x => x*2, 21)` resolves to `42` via a reverse call over the
/// same connection.
#[tokio::test]
async fn callback_round_trip() {
    init_logging();
    let (left, right) = endpoint::local_pair();
    let root = service(|method, args| {
        Box::pin(async move {
            match method {
                Some("apply") => {
                    let mut it = args.into_iter();
                    let callback = it.next();
                    let arg = it.next().unwrap_or(Value::Null);
                    match callback {
                        Some(Value::Remote(proxy)) => proxy.call(None, vec![arg]).await.map_err(|err| match err {
                            CallError::Remote(remote) => remote,
                            other => RemoteError::new(other.to_string()),
                        }),
                        _ => Err(RemoteError::type_error("apply expects a callback")),
                    }
                }
                _ => Err(RemoteError::type_error("no such method")),
            }
        })
    });
    let _server = expose(root, left, ConnectOptions::default());
    let (_client, proxy) = wrap(right, ConnectOptions::default()).await.unwrap();

    let doubler = Value::callback(|args| {
        Box::pin(async move {
            match args.into_iter().next() {
                Some(Value::Number(n)) => Ok(Value::Number(n * 2.0)),
                _ => Ok(Value::Null),
            }
        })
    });

    let result = proxy.call(Some("apply"), vec![doubler, Value::Number(21.0)]).await.unwrap();
    assert!(matches!(result, Value::Number(n) if n == 42.0));
}

/// Scenario 4: `o = { v: 42 }; o.self = o`. `{ echo(x){ return x } }`.
/// Expected: `r.v === 42 && r.self === r`.
#[tokio::test]
async fn cycle() {
    init_logging();
    let (left, right) = endpoint::local_pair();
    let root = service(|method, args| {
        Box::pin(async move {
            match method {
                Some("echo") => Ok(args.into_iter().next().unwrap_or(Value::Null)),
                _ => Err(RemoteError::type_error("no such method")),
            }
        })
    });
    let _server = expose(root, left, ConnectOptions::default());
    let (_client, proxy) = wrap(right, ConnectOptions::default()).await.unwrap();

    let o = Value::object(vec![("v".to_string(), Value::Number(42.0))]);
    let arc = match &o {
        Value::Map(arc) => arc.clone(),
        _ => unreachable!(),
    };
    arc.lock().push(("self".to_string(), Value::Map(arc.clone())));

    let r = proxy.call(Some("echo"), vec![o]).await.unwrap();
    let Value::Map(returned) = &r else { panic!("expected a map back, got {r:?}") };
    let fields = returned.lock();
    assert_eq!(fields.len(), 2);
    assert!(matches!(&fields[0], (k, Value::Number(n)) if k == "v" && *n == 42.0));
    match &fields[1] {
        (k, Value::Map(self_ref)) => {
            assert_eq!(k, "self");
            assert!(Arc::ptr_eq(self_ref, returned));
        }
        other => panic!("expected `self` to be a map back-reference, got {other:?}"),
    }
}

/// Scenario 5: `shared = {n:1}; a = {ref:shared}; b = {ref:shared}`.
/// `{ echo2(x,y){ return [x,y] } }`. Expected:
/// `result[0].ref === result[1].ref`.
#[tokio::test]
async fn shared_subgraph() {
    init_logging();
    let (left, right) = endpoint::local_pair();
    let root = service(|method, args| {
        Box::pin(async move {
            match method {
                Some("echo2") => Ok(Value::array(args)),
                _ => Err(RemoteError::type_error("no such method")),
            }
        })
    });
    let _server = expose(root, left, ConnectOptions::default());
    let (_client, proxy) = wrap(right, ConnectOptions::default()).await.unwrap();

    let shared = Value::object(vec![("n".to_string(), Value::Number(1.0))]);
    let shared_arc = match &shared {
        Value::Map(arc) => arc.clone(),
        _ => unreachable!(),
    };
    let a = Value::object(vec![("ref".to_string(), Value::Map(shared_arc.clone()))]);
    let b = Value::object(vec![("ref".to_string(), Value::Map(shared_arc.clone()))]);

    let result = proxy.call(Some("echo2"), vec![a, b]).await.unwrap();
    let Value::Array(pair) = &result else { panic!("expected an array back, got {result:?}") };
    let pair = pair.lock();
    assert_eq!(pair.len(), 2);

    let ref_of = |value: &Value| match value {
        Value::Map(fields) => match &fields.lock()[0] {
            (name, Value::Map(target)) if name == "ref" => target.clone(),
            other => panic!("expected a `ref` field, got {other:?}"),
        },
        other => panic!("expected a map, got {other:?}"),
    };
    let ref_a = ref_of(&pair[0]);
    let ref_b = ref_of(&pair[1]);
    assert!(Arc::ptr_eq(&ref_a, &ref_b));
}

struct Token {
    id: String,
}

impl Exposable for Token {
    fn call(&self, _method: Option<&str>, _args: Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> {
        Box::pin(async { Err(RemoteError::type_error("token is opaque")) })
    }
}

/// Scenario 6: `{ mkTok(){ return handle(new Token('t')) }, name(h){ return
/// getHandleValue(h).id } }`. `t = await remote.mkTok(); await
/// remote.name(t)` yields `'t'`; `t` exposes no readable members.
#[tokio::test]
async fn handle_opacity() {
    init_logging();
    let (left, right) = endpoint::local_pair();
    let root = service(|method, args| {
        Box::pin(async move {
            match method {
                Some("mkTok") => Ok(Value::handle(Arc::new(Token { id: "t".to_string() }))),
                Some("name") => {
                    let token = args.into_iter().next().and_then(|v| v.get_handle_value());
                    match token.as_deref().and_then(|t| t.downcast_ref::<Token>()) {
                        Some(token) => Ok(Value::String(token.id.clone())),
                        None => Err(RemoteError::type_error("name expects a token handle")),
                    }
                }
                _ => Err(RemoteError::type_error("no such method")),
            }
        })
    });
    let _server = expose(root, left, ConnectOptions::default());
    let (_client, proxy) = wrap(right, ConnectOptions::default()).await.unwrap();

    let token = proxy.call(Some("mkTok"), vec![]).await.unwrap();
    assert!(matches!(token, Value::Remote(_)));

    let name = proxy.call(Some("name"), vec![token]).await.unwrap();
    assert!(matches!(name, Value::String(ref s) if s == "t"));
}

/// Scenario 7: with `{debug: true, nested_proxies: false}`, exposing
/// `{ f(o){} }` and calling `remote.f({a:{b:()=>0}})` rejects synchronously
/// with a structural error whose path is `a.b` and value type `function`.
#[tokio::test]
async fn debug_path() {
    init_logging();
    let (left, right) = endpoint::local_pair();
    let options = || ConnectOptions { debug: true, ..ConnectOptions::default() };
    let root = service(|_method, _args| Box::pin(async { Ok(Value::Null) }));
    let _server = expose(root, left, options());
    let (_client, proxy) = wrap(right, options()).await.unwrap();

    let callback = Value::callback(|_args| Box::pin(async { Ok(Value::Number(0.0)) }));
    let nested = Value::object(vec![("b".to_string(), callback)]);
    let arg = Value::object(vec![("a".to_string(), nested)]);

    let err = proxy.call(Some("f"), vec![arg]).await.unwrap_err();
    match err {
        CallError::Transport(duplex_rpc::ConnectionError::NonCloneable(e)) => {
            assert_eq!(e.path, "a.b");
            assert_eq!(e.value_type, duplex_rpc::wire::ValueType::Function);
        }
        other => panic!("expected a non-cloneable structural error, got {other:?}"),
    }
}

struct Signaled {
    dropped: Arc<AtomicBool>,
}

impl Exposable for Signaled {
    fn call(&self, _method: Option<&str>, _args: Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> {
        Box::pin(async { Ok(Value::Null) })
    }
}

impl Drop for Signaled {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// Scenario 8: dropping the last reference to a received proxy sends a
/// `release`; the exposing side drops its own local entry in response,
/// observable here as the exposed target's own destructor running.
#[tokio::test]
async fn finalization_release() {
    init_logging();
    let (left, right) = endpoint::local_pair();
    let dropped = Arc::new(AtomicBool::new(false));
    let dropped_for_root = dropped.clone();
    let root = service(move |method, _args| {
        let dropped = dropped_for_root.clone();
        Box::pin(async move {
            match method {
                Some("mk") => Ok(Value::proxy(Arc::new(Signaled { dropped }))),
                _ => Err(RemoteError::type_error("no such method")),
            }
        })
    });
    let _server = expose(root, left, ConnectOptions::default());
    let (_client, proxy) = wrap(right, ConnectOptions::default()).await.unwrap();

    let target = proxy.call(Some("mk"), vec![]).await.unwrap();
    assert!(matches!(target, Value::Remote(_)));
    assert!(!dropped.load(Ordering::SeqCst));

    drop(target);

    let mut waited = Duration::ZERO;
    while !dropped.load(Ordering::SeqCst) && waited < Duration::from_secs(1) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert!(dropped.load(Ordering::SeqCst), "exposed target was not released after the proxy was dropped");
}
