//! Executes inbound invocations against the local registry.
//!
//! Calls from one sender run one after another. A handler that waits on a
//! nested call through the messenger hands its place in that queue to the
//! next call, so call chains that come back to a busy sender cannot deadlock.

use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;

use invokerpc::Fault;
use invokerpc::Invoke;
use invokerpc::Outcome;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::warn;

use crate::registry::RemoteRegistry;

thread_local! {
    static QUEUE_RELEASE: RefCell<Option<oneshot::Sender<()>>> = const { RefCell::new(None) };
}

/// Lets the sender queue running the current handler start its next call.
///
/// Called when a handler begins waiting on a nested call. Does nothing
/// outside a handler or when the queue was already released.
pub(crate) fn release_queue() {
    if let Some(release) = QUEUE_RELEASE.with(|slot| slot.borrow_mut().take()) {
        let _ = release.send(());
    }
}

/// Installs a handler's queue release on the blocking thread running it.
struct QueueGuard;

impl QueueGuard {
    fn enter(release: Option<oneshot::Sender<()>>) -> Self {
        QUEUE_RELEASE.with(|slot| *slot.borrow_mut() = release);
        QueueGuard
    }
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        QUEUE_RELEASE.with(|slot| slot.borrow_mut().take());
    }
}

pub struct Dispatcher {
    registry: Arc<RemoteRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RemoteRegistry>) -> Self {
        Self { registry }
    }

    /// Runs `invoke` and reports how it went.
    ///
    /// Never fails outright: an unknown remote, a missing overload, a handler
    /// error and a handler panic all come back as a [`Fault`] outcome.
    pub async fn invoke(&self, invoke: &Invoke) -> Outcome {
        self.invoke_queued(invoke, None).await
    }

    /// Like [`Dispatcher::invoke`], for a call taken from a sender's queue.
    ///
    /// `release` fires if the handler waits on a nested call; it is dropped
    /// unfired once the call is over.
    pub async fn invoke_queued(&self, invoke: &Invoke, release: Option<oneshot::Sender<()>>) -> Outcome {
        let call = invoke.call();
        let object = match self.registry.resolve(call.remote_name()) {
            Ok(object) => object,
            Err(fault) => return Outcome::Fault(fault),
        };

        let Some(handler) = object.find(call.method_name(), call.arg_types()) else {
            return Outcome::Fault(Fault::NoMatchingMethod {
                remote: call.remote_name().to_string(),
                method: call.method_name().to_string(),
                arg_types: call.arg_types().to_vec(),
            });
        };

        // Handlers are plain functions that may block; keep them off the reactor.
        let args = call.args().to_vec();
        let joined = tokio::task::spawn_blocking(move || {
            let _queue = QueueGuard::enter(release);
            handler(&args)
        })
        .await;

        match joined {
            Ok(Ok(value)) => Outcome::Result(value),
            Ok(Err(e)) => {
                debug!(%invoke, error = %e, "handler failed");
                Outcome::Fault(Fault::Execution { message: format!("{:#}", e) })
            }
            Err(join_error) => {
                let message = match join_error.try_into_panic() {
                    Ok(payload) => panic_message(payload.as_ref()),
                    Err(e) => e.to_string(),
                };
                warn!(%invoke, %message, "handler panicked");
                Outcome::Fault(Fault::Execution { message })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}
