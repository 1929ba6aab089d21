//! Handler objects and the stock [`Service`] implementation.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// The eventual result of a deferred method.
pub type DeferredResult = BoxFuture<'static, Result<Value, HandlerError>>;

/// What invoking a method produced.
pub enum Outcome {
    /// The method finished synchronously with this value.
    Immediate(Value),
    /// The method hands back work that completes later.
    Deferred(DeferredResult),
}

impl Outcome {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Outcome::Deferred(future.boxed())
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Immediate(value) => f.debug_tuple("Immediate").field(value).finish(),
            Outcome::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Failure raised by a handler method. Its message is what the caller sees.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        HandlerError::new(format!("invalid arguments: {}", error))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::new(message)
    }
}

/// Positional call arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<Value>);

impl Params {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }

    /// Deserializes the whole argument list, typically into a tuple.
    ///
    /// ```
    /// # use aliasrpc_server::Params;
    /// # use serde_json::json;
    /// let params = Params::new(vec![json!(2), json!("x")]);
    /// let (n, s): (u32, String) = params.parse().unwrap();
    /// assert_eq!((n, s.as_str()), (2, "x"));
    /// ```
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_value(Value::Array(self.0.clone()))?)
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// An object whose methods can be called remotely.
pub trait Handler: Send + Sync + 'static {
    /// Name the handler is registered under when no alias is given.
    fn name(&self) -> Option<&str> {
        None
    }

    fn has_method(&self, method: &str) -> bool;

    fn method_names(&self) -> Vec<String>;

    /// Runs `method`. An `Err` here is a synchronous failure of the method.
    fn invoke(&self, method: &str, params: Params) -> Result<Outcome, HandlerError>;
}

type ImmediateFn = Arc<dyn Fn(Params) -> Result<Value, HandlerError> + Send + Sync>;
type DeferredFn = Arc<dyn Fn(Params) -> DeferredResult + Send + Sync>;

#[derive(Clone)]
enum Method {
    Immediate(ImmediateFn),
    Deferred(DeferredFn),
}

/// A table of named methods, each either immediate or deferred.
///
/// ```
/// # use aliasrpc_server::{Handler, HandlerError, Service};
/// # use serde_json::json;
/// let echo = Service::named("echo")
///     .immediate("echo", |params| Ok(params.get(0).cloned().unwrap_or_default()))
///     .deferred("later", |params| async move { Ok::<_, HandlerError>(json!(params.len())) });
/// assert!(echo.has_method("later"));
/// ```
#[derive(Clone, Default)]
pub struct Service {
    name: Option<String>,
    methods: HashMap<String, Method>,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            methods: HashMap::new(),
        }
    }

    pub fn immediate<F>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(Params) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.methods.insert(method.into(), Method::Immediate(Arc::new(f)));
        self
    }

    pub fn deferred<F, Fut>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let f: DeferredFn = Arc::new(move |params| f(params).boxed());
        self.methods.insert(method.into(), Method::Deferred(f));
        self
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .finish()
    }
}

impl Handler for Service {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    fn invoke(&self, method: &str, params: Params) -> Result<Outcome, HandlerError> {
        match self.methods.get(method) {
            Some(Method::Immediate(f)) => f(params).map(Outcome::Immediate),
            Some(Method::Deferred(f)) => Ok(Outcome::Deferred(f(params))),
            None => Err(HandlerError::new(format!("no such method: {}", method))),
        }
    }
}
