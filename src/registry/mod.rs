//! Service registry.
//!
//! Maps `"Service.Method"` and bare method names to callable
//! [`MethodDescriptor`]s. One lock guards both tables and is only held for
//! the duration of a lookup or an insert, never across an invocation.

mod service;

pub use service::{MethodDescriptor, MethodSet, RpcService, Service};

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::types::{backend_kind, BackendError, Error, Result};
use service::{derived_service_name, method_name_problem};

#[derive(Debug, Default)]
struct RegistryInner {
    services: HashMap<String, Arc<Service>>,
    /// Bare method name → (owning service, method).
    flat: HashMap<String, (String, Arc<MethodDescriptor>)>,
}

/// Registered services, shared by every connection of a server.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `receiver` under its type name.
    pub fn register<S: RpcService>(&self, receiver: S) -> Result<()> {
        let name = derived_service_name::<S>();
        if !name.starts_with(|c: char| c.is_ascii_uppercase()) {
            let msg = format!("rpc Register: type {} is not exported", name);
            tracing::warn!("{}", msg);
            return Err(Error::registration(msg));
        }
        self.insert(name, receiver)
    }

    /// Register `receiver` under an explicit service name.
    pub fn register_name<S: RpcService>(&self, name: &str, receiver: S) -> Result<()> {
        self.insert(name, receiver)
    }

    fn insert<S: RpcService>(&self, name: &str, receiver: S) -> Result<()> {
        if name.is_empty() {
            return Err(Error::registration(format!(
                "rpc: no service name for type {}",
                std::any::type_name::<S>()
            )));
        }
        if name.contains('.') {
            return Err(Error::registration(format!(
                "rpc: service name {} contains '.'",
                name
            )));
        }

        // Build the method table before taking the lock
        let mut methods: HashMap<String, Arc<MethodDescriptor>> = HashMap::new();
        for descriptor in MethodSet::collect(receiver) {
            if let Some(problem) = method_name_problem(descriptor.name()) {
                tracing::warn!(service = name, method = descriptor.name(), "skipping method: {}", problem);
                continue;
            }
            match methods.entry(descriptor.name().to_string()) {
                Entry::Occupied(_) => {
                    tracing::warn!(service = name, method = descriptor.name(), "skipping method: declared twice");
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(descriptor));
                }
            }
        }

        if methods.is_empty() {
            let msg = format!(
                "rpc Register: type {} has no exported methods of suitable type",
                name
            );
            tracing::warn!("{}", msg);
            return Err(Error::registration(msg));
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.services.contains_key(name) {
            return Err(Error::registration(format!(
                "rpc: service already defined: {}",
                name
            )));
        }
        // Reject the whole service if any bare name is already taken
        if let Some((method, (owner, _))) = methods
            .keys()
            .find_map(|m| inner.flat.get(m).map(|entry| (m, entry)))
        {
            return Err(Error::registration(format!(
                "method {} already exists in service {}",
                method, owner
            )));
        }

        for (method_name, descriptor) in &methods {
            inner
                .flat
                .insert(method_name.clone(), (name.to_string(), Arc::clone(descriptor)));
        }
        let count = methods.len();
        inner
            .services
            .insert(name.to_string(), Arc::new(Service::new(name.to_string(), methods)));
        tracing::info!(service = name, methods = count, "service registered");
        Ok(())
    }

    /// Resolve `"Service.Method"` or a bare method name.
    pub fn lookup(&self, service_method: &str) -> std::result::Result<Arc<MethodDescriptor>, BackendError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        let Some((service_name, method_name)) = service_method.split_once('.') else {
            return inner
                .flat
                .get(service_method)
                .map(|(_, descriptor)| Arc::clone(descriptor))
                .ok_or_else(|| {
                    BackendError::new(
                        backend_kind::METHOD_NOT_FOUND,
                        format!("rpc: can not find method {}", service_method),
                    )
                });
        };

        if service_name.is_empty() || method_name.is_empty() {
            return Err(BackendError::new(
                backend_kind::INVALID_METHOD,
                format!("rpc: service/method request ill-formed: {}", service_method),
            ));
        }

        let service = inner.services.get(service_name).ok_or_else(|| {
            BackendError::new(
                backend_kind::SERVICE_NOT_FOUND,
                format!("rpc: can not find service {}", service_method),
            )
        })?;
        service.method(method_name).cloned().ok_or_else(|| {
            BackendError::new(
                backend_kind::METHOD_NOT_FOUND,
                format!("rpc: can not find method {}", service_method),
            )
        })
    }

    /// Registered service names, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = inner.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Method names of one service, sorted.
    pub fn method_names(&self, service: &str) -> Option<Vec<String>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.services.get(service).map(|s| {
            let mut names: Vec<String> = s.methods().map(|m| m.name().to_string()).collect();
            names.sort();
            names
        })
    }
}
