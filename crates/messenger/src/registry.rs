//! # Remote Registry
//!
//! Which named remotes this node serves, and which nodes serve each broadcast
//! group. One registry belongs to one messenger for the length of a session.
//!
//! Uses DashMap so dispatch can resolve names while the session start and
//! teardown logic registers and unregisters them.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use invokerpc::Fault;
use invokerpc::NodeId;
use invokerpc::TypeTag;
use invokerpc::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A remote with this name is already registered on this node.
    AlreadyRegistered(String),
    /// Two methods were declared with the same name and parameter types.
    DuplicateMethod { method: String, params: Vec<TypeTag> },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered(name) => write!(f, "remote '{}' is already registered", name),
            Self::DuplicateMethod { method, params } => {
                write!(f, "method '{}' declared twice with parameters {:?}", method, params)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// The body of a remote method.
pub type Handler = dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync;

struct Method {
    params: Vec<TypeTag>,
    handler: Arc<Handler>,
}

/// A set of invokable methods, keyed by name and parameter types.
///
/// Several methods may share a name as long as their parameter types differ.
pub struct RemoteObject {
    methods: HashMap<String, Vec<Method>>,
}

impl RemoteObject {
    pub fn builder() -> RemoteObjectBuilder {
        RemoteObjectBuilder { methods: Vec::new() }
    }

    /// Resolves the overload of `method` whose parameter types are exactly `arg_types`.
    pub fn find(&self, method: &str, arg_types: &[TypeTag]) -> Option<Arc<Handler>> {
        self.methods
            .get(method)?
            .iter()
            .find(|m| m.params == arg_types)
            .map(|m| m.handler.clone())
    }

    /// Every `(name, parameter types)` this object answers to.
    pub fn signatures(&self) -> impl Iterator<Item = (&str, &[TypeTag])> {
        self.methods
            .iter()
            .flat_map(|(name, overloads)| overloads.iter().map(move |m| (name.as_str(), m.params.as_slice())))
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("methods", &self.signatures().collect::<Vec<_>>())
            .finish()
    }
}

pub struct RemoteObjectBuilder {
    methods: Vec<(String, Method)>,
}

impl RemoteObjectBuilder {
    /// Declares a method. `params` are matched against a call's argument types.
    pub fn method<F>(mut self, name: impl Into<String>, params: &[TypeTag], handler: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.methods.push((name.into(), Method { params: params.to_vec(), handler: Arc::new(handler) }));
        self
    }

    pub fn build(self) -> Result<RemoteObject> {
        let mut methods: HashMap<String, Vec<Method>> = HashMap::new();
        for (name, method) in self.methods {
            let overloads = methods.entry(name.clone()).or_default();
            if overloads.iter().any(|m| m.params == method.params) {
                return Err(RegistryError::DuplicateMethod { method: name, params: method.params });
            }
            overloads.push(method);
        }
        Ok(RemoteObject { methods })
    }
}

struct Registration {
    object: Arc<RemoteObject>,
    group: Option<String>,
}

/// Name → local implementation, plus group → serving nodes.
pub struct RemoteRegistry {
    local: NodeId,
    remotes: DashMap<String, Registration>,
    groups: DashMap<String, HashSet<NodeId>>,
}

impl RemoteRegistry {
    pub fn new(local: NodeId) -> Self {
        Self { local, remotes: DashMap::new(), groups: DashMap::new() }
    }

    /// Registers `object` under `name`. With a `group`, this node joins it.
    pub fn register(&self, name: &str, object: RemoteObject, group: Option<&str>) -> Result<()> {
        match self.remotes.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(RegistryError::AlreadyRegistered(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Registration { object: Arc::new(object), group: group.map(str::to_string) });
            }
        }
        if let Some(group) = group {
            self.join(group, self.local);
        }
        debug!(node = %self.local, remote = name, group, "registered remote");
        Ok(())
    }

    /// Removes `name`. Calls that already resolved it run to completion.
    ///
    /// Returns whether anything was registered under `name`.
    pub fn unregister(&self, name: &str) -> bool {
        let Some((_, registration)) = self.remotes.remove(name) else {
            return false;
        };
        if let Some(group) = registration.group {
            let still_served = self
                .remotes
                .iter()
                .any(|r| r.group.as_deref() == Some(group.as_str()));
            if !still_served {
                self.leave(&group, self.local);
            }
        }
        debug!(node = %self.local, remote = name, "unregistered remote");
        true
    }

    pub fn resolve(&self, name: &str) -> std::result::Result<Arc<RemoteObject>, Fault> {
        self.remotes
            .get(name)
            .map(|r| r.object.clone())
            .ok_or_else(|| Fault::UnknownRemote { name: name.to_string() })
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.remotes.contains_key(name)
    }

    /// Records that `node` serves `group`.
    pub fn join(&self, group: &str, node: NodeId) {
        self.groups.entry(group.to_string()).or_default().insert(node);
    }

    /// Records that `node` no longer serves `group`.
    pub fn leave(&self, group: &str, node: NodeId) {
        self.groups.remove_if_mut(group, |_, members| {
            members.remove(&node);
            members.is_empty()
        });
    }

    /// Drops `node` from every group.
    pub fn forget_node(&self, node: NodeId) {
        self.groups.retain(|_, members| {
            members.remove(&node);
            !members.is_empty()
        });
    }

    /// Point-in-time copy of the nodes serving `group`.
    pub fn members_of(&self, group: &str) -> HashSet<NodeId> {
        self.groups.get(group).map(|m| m.value().clone()).unwrap_or_default()
    }

    /// Forgets every remote and group. Called at session end.
    pub fn clear(&self) {
        self.remotes.clear();
        self.groups.clear();
    }
}
