use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use aliasrpc_common::{Result, RpcError};
use aliasrpc_registry::AllowedMethods;

use crate::handler::Handler;
use crate::heartbeat::Heartbeat;

/// A handler to register, with its alias and optional method whitelist.
#[derive(Clone)]
pub struct HandlerSpec {
    pub alias: Option<String>,
    pub target: Arc<dyn Handler>,
    /// Empty means every method of the target is callable.
    pub methods: Vec<String>,
}

impl HandlerSpec {
    pub fn new(target: impl Handler) -> Self {
        Self::from_arc(Arc::new(target))
    }

    pub fn from_arc(target: Arc<dyn Handler>) -> Self {
        Self {
            alias: None,
            target,
            methods: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSpec")
            .field("alias", &self.alias)
            .field("target", &self.target.name())
            .field("methods", &self.methods)
            .finish()
    }
}

/// A registered handler.
pub struct HandlerDescriptor {
    alias: String,
    target: Arc<dyn Handler>,
    whitelist: Option<BTreeSet<String>>,
}

impl HandlerDescriptor {
    /// Validates `spec` into a descriptor.
    ///
    /// Also returns the whitelist entries that were dropped because the
    /// target has no such method.
    pub fn from_spec(spec: HandlerSpec) -> Result<(Self, Vec<String>)> {
        let HandlerSpec {
            alias,
            target,
            methods,
        } = spec;

        let alias = alias
            .filter(|alias| !alias.is_empty())
            .or_else(|| target.name().filter(|name| !name.is_empty()).map(str::to_string))
            .ok_or_else(|| {
                RpcError::InvalidAlias("handler has neither an alias nor a name".to_string())
            })?;

        let mut rejected = Vec::new();
        let whitelist = if methods.is_empty() {
            None
        } else {
            let mut allowed = BTreeSet::new();
            for method in methods {
                if target.has_method(&method) {
                    allowed.insert(method);
                } else {
                    rejected.push(method);
                }
            }
            Some(allowed)
        };

        Ok((
            Self {
                alias,
                target,
                whitelist,
            },
            rejected,
        ))
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn target(&self) -> &Arc<dyn Handler> {
        &self.target
    }

    pub fn whitelist(&self) -> Option<&BTreeSet<String>> {
        self.whitelist.as_ref()
    }

    /// Whether the whitelist lets `method` through. Says nothing about
    /// whether the target implements it.
    pub fn permits(&self, method: &str) -> bool {
        self.whitelist
            .as_ref()
            .map_or(true, |allowed| allowed.contains(method))
    }

    pub fn allowed_methods(&self) -> AllowedMethods {
        AllowedMethods::from(self.whitelist.as_ref())
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("alias", &self.alias)
            .field("whitelist", &self.whitelist)
            .finish()
    }
}

/// Alias to descriptor map.
#[derive(Debug, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<HandlerDescriptor>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the descriptor for its alias, returning the old one.
    pub fn insert(&mut self, descriptor: HandlerDescriptor) -> Option<Arc<HandlerDescriptor>> {
        self.handlers
            .insert(descriptor.alias.clone(), Arc::new(descriptor))
    }

    pub fn resolve(&self, alias: &str) -> Option<Arc<HandlerDescriptor>> {
        self.handlers.get(alias).cloned()
    }

    pub fn remove(&mut self, alias: &str) -> Option<Arc<HandlerDescriptor>> {
        self.handlers.remove(alias)
    }

    /// Registered aliases, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.handlers.keys().cloned().collect();
        aliases.sort();
        aliases
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Everything a server tracks per alias, kept under one lock.
#[derive(Debug, Default)]
pub struct Registrations {
    pub handlers: HandlerTable,
    pub(crate) heartbeats: HashMap<String, Heartbeat>,
    pub(crate) closed: bool,
}

impl Registrations {
    pub fn resolve(&self, alias: &str) -> Option<Arc<HandlerDescriptor>> {
        self.handlers.resolve(alias)
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Service;
    use serde_json::json;

    fn math() -> Service {
        Service::named("math")
            .immediate("add", |_| Ok(json!(0)))
            .immediate("sub", |_| Ok(json!(0)))
    }

    #[test]
    fn test_alias_defaults_to_handler_name() {
        let (descriptor, rejected) = HandlerDescriptor::from_spec(HandlerSpec::new(math())).unwrap();
        assert_eq!(descriptor.alias(), "math");
        assert!(rejected.is_empty());
        assert!(descriptor.whitelist().is_none());
        assert_eq!(descriptor.allowed_methods(), AllowedMethods::all());
    }

    #[test]
    fn test_explicit_alias_wins() {
        let spec = HandlerSpec::new(math()).alias("calc");
        let (descriptor, _) = HandlerDescriptor::from_spec(spec).unwrap();
        assert_eq!(descriptor.alias(), "calc");
    }

    #[test]
    fn test_missing_alias_is_rejected() {
        let anonymous = Service::new().immediate("ping", |_| Ok(json!("pong")));
        let err = HandlerDescriptor::from_spec(HandlerSpec::new(anonymous)).unwrap_err();
        assert!(matches!(err, RpcError::InvalidAlias(_)));

        let empty = HandlerSpec::new(Service::new()).alias("");
        assert!(HandlerDescriptor::from_spec(empty).is_err());
    }

    #[test]
    fn test_whitelist_drops_unknown_methods() {
        let spec = HandlerSpec::new(math()).methods(["add", "mul"]);
        let (descriptor, rejected) = HandlerDescriptor::from_spec(spec).unwrap();
        assert_eq!(rejected, vec!["mul"]);
        assert!(descriptor.permits("add"));
        assert!(!descriptor.permits("sub"));
        assert_eq!(descriptor.allowed_methods(), AllowedMethods::only(["add"]));
    }

    #[test]
    fn test_fully_rejected_whitelist_forbids_everything() {
        let spec = HandlerSpec::new(math()).methods(["mul", "div"]);
        let (descriptor, rejected) = HandlerDescriptor::from_spec(spec).unwrap();
        assert_eq!(rejected.len(), 2);
        assert!(!descriptor.permits("add"));
        assert!(!descriptor.permits("sub"));
    }

    #[test]
    fn test_table_replaces_by_alias() {
        let mut table = HandlerTable::new();
        let (first, _) = HandlerDescriptor::from_spec(HandlerSpec::new(math())).unwrap();
        let (second, _) =
            HandlerDescriptor::from_spec(HandlerSpec::new(math()).methods(["add"])).unwrap();

        assert!(table.insert(first).is_none());
        assert!(table.insert(second).is_some());
        assert_eq!(table.len(), 1);
        assert!(!table.resolve("math").unwrap().permits("sub"));
        assert!(table.resolve("echo").is_none());
    }
}
