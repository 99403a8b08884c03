//! A bidirectional, type-safe RPC runtime over message-passing endpoints.
//!
//! Two peers exchange calls over an [`Endpoint`]: one side [`expose`]s a
//! root object, the other [`wrap`]s the same endpoint to get a
//! [`RemoteProxy`] for it. From there, calling, reading or writing a
//! property on a proxy sends a message to the peer and returns a future
//! that resolves with the reply; values passed either direction may
//! themselves carry further exposed targets, callbacks or then-ables, which
//! come back as proxies and futures on the other side.
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::future::BoxFuture;
//! use duplex_rpc::{endpoint, entry, value::{Exposable, Value}, ConnectOptions, RemoteError};
//!
//! struct Doubler;
//!
//! impl Exposable for Doubler {
//!     fn call(&self, _method: Option<&str>, args: Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> {
//!         Box::pin(async move {
//!             match args.into_iter().next() {
//!                 Some(Value::Number(n)) => Ok(Value::Number(n * 2.0)),
//!                 _ => Ok(Value::Null),
//!             }
//!         })
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (left, right) = endpoint::local_pair();
//!
//! let _server = entry::expose(Arc::new(Doubler), left, ConnectOptions::default());
//!
//! let (_client, proxy) = entry::wrap(right, ConnectOptions::default()).await?;
//! let doubled = proxy.call(None, vec![Value::Number(21.0)]).await?;
//! assert!(matches!(doubled, Value::Number(n) if n == 42.0));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![forbid(unsafe_code)]

mod connection;
pub mod debug;
pub mod endpoint;
pub mod entry;
pub mod error;
pub mod handler;
pub mod proxy;
mod registry;
mod serializer;
pub mod value;
pub mod wire;

pub use connection::{ConnectOptions, Connection};
pub use entry::{expose, wrap};
pub use error::{CallError, ConnectionError, InvalidId, NonCloneableError, RemoteError};
pub use handler::{Handler, HandlerContext, HandlerRegistry};
// Re-exported so that a `Handler` implementation outside this crate can
// actually name the context types its `to_wire`/`from_wire` signatures take.
pub use serializer::{FromWireCtx, ToWireCtx};
pub use proxy::{ProxyProperty, RemoteProxy};
pub use value::{Exposable, Value};
