use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use aliasrpc_common::{Base, CallEnvelope, FaultKind, Reply, ResponseEnvelope};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::events::{Events, ServerEvent};
use crate::handler::{HandlerError, Outcome, Params};
use crate::table::Registrations;

/// Routes call envelopes to registered handlers.
#[derive(Clone)]
pub struct Dispatcher {
    registrations: Arc<RwLock<Registrations>>,
    sender: String,
    events: Events,
}

impl Dispatcher {
    /// `sender` is stamped into the base of every response.
    pub fn new(
        registrations: Arc<RwLock<Registrations>>,
        sender: impl Into<String>,
        events: Events,
    ) -> Self {
        Self {
            registrations,
            sender: sender.into(),
            events,
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Handles one call. Always yields exactly one reply.
    pub async fn dispatch(&self, call: CallEnvelope) -> Reply {
        debug!(
            handler = %call.handler_name(),
            method = %call.method_name(),
            sender = %call.base.sender,
            "dispatching call"
        );
        self.events.emit(ServerEvent::Call(call.clone()));

        let reply = self.route(&call).await;
        if let Reply::Fault(fault) = &reply {
            debug!(
                handler = %call.handler_name(),
                method = %call.method_name(),
                kind = %fault.err,
                message = %fault.message,
                "call failed"
            );
        }
        reply
    }

    async fn route(&self, call: &CallEnvelope) -> Reply {
        let args = match call.decode_params() {
            Ok(args) => args,
            Err(e) => return e.into(),
        };

        let name = call.handler_name();
        let method = call.method_name();

        let Some(descriptor) = self.registrations.read().await.resolve(name) else {
            return not_found(name, method);
        };
        if !descriptor.permits(method) {
            return Reply::fault(FaultKind::Forbidden, "method forbidden");
        }
        let target = descriptor.target();
        if !target.has_method(method) {
            return not_found(name, method);
        }

        let invoked = catch_unwind(AssertUnwindSafe(|| target.invoke(method, Params::from(args))));
        let value = match invoked {
            Ok(Ok(Outcome::Immediate(value))) => Ok(value),
            Ok(Ok(Outcome::Deferred(future))) => match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(panic_error(panic)),
            },
            Ok(Err(e)) => Err(e),
            Err(panic) => Err(panic_error(panic)),
        };

        match value {
            Ok(value) => self.respond(value),
            Err(e) => Reply::fault(FaultKind::Application, e.message()),
        }
    }

    fn respond(&self, value: Value) -> Reply {
        match ResponseEnvelope::new(Base::new(self.sender.clone()), value) {
            Ok(response) => Reply::Response(response),
            Err(e) => Reply::fault(FaultKind::Application, format!("unserializable result: {}", e)),
        }
    }
}

fn not_found(name: &str, method: &str) -> Reply {
    Reply::fault(
        FaultKind::NotFound,
        format!("Cannot find handler {} or method {}", name, method),
    )
}

fn panic_error(panic: Box<dyn Any + Send>) -> HandlerError {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    };
    HandlerError::new(message)
}
