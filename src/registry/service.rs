//! Services and their callable methods.
//!
//! Methods are registered explicitly through [`MethodSet`] rather than
//! discovered at runtime: a type implements [`RpcService`] and lists its
//! remotely callable methods, each with a concrete argument and reply type.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::protocol::payload;
use crate::types::{backend_kind, BackendError};

/// A receiver whose methods can be exposed over RPC.
///
/// ```
/// use oocrpc::registry::{MethodSet, RpcService};
/// use oocrpc::BackendError;
///
/// struct Echo;
///
/// impl Echo {
///     fn say(&self, arg: String, reply: &mut String) -> Result<(), BackendError> {
///         *reply = arg;
///         Ok(())
///     }
/// }
///
/// impl RpcService for Echo {
///     fn methods(set: &mut MethodSet<Self>) {
///         set.method("Say", Echo::say);
///     }
/// }
/// ```
pub trait RpcService: Send + Sync + Sized + 'static {
    /// Enumerate the methods to expose, in order.
    fn methods(set: &mut MethodSet<Self>);
}

type Invoker = dyn Fn(&[u8], &mut Vec<u8>) -> Result<(), BackendError> + Send + Sync;

/// One remotely callable method bound to its receiver.
pub struct MethodDescriptor {
    name: String,
    arg_type: &'static str,
    reply_type: &'static str,
    invoker: Box<Invoker>,
}

impl MethodDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rust type name of the argument.
    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }

    /// Rust type name of the reply.
    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }

    /// Decode the argument from `payload`, run the method against a fresh
    /// default reply, and append the encoded reply to `out`.
    pub fn invoke(&self, payload: &[u8], out: &mut Vec<u8>) -> Result<(), BackendError> {
        (self.invoker)(payload, out)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("arg_type", &self.arg_type)
            .field("reply_type", &self.reply_type)
            .finish_non_exhaustive()
    }
}

/// Collects the methods of one receiver during registration.
pub struct MethodSet<S> {
    receiver: Arc<S>,
    methods: Vec<MethodDescriptor>,
}

impl<S: RpcService> MethodSet<S> {
    pub(crate) fn collect(receiver: S) -> Vec<MethodDescriptor> {
        let mut set = MethodSet {
            receiver: Arc::new(receiver),
            methods: Vec::new(),
        };
        S::methods(&mut set);
        set.methods
    }

    /// Expose `f` under `name`.
    ///
    /// The reply starts as `R::default()` and `f` fills it in; whatever it
    /// holds when `f` returns `Ok` is sent back.
    pub fn method<A, R, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        A: DeserializeOwned + 'static,
        R: Serialize + Default + 'static,
        F: Fn(&S, A, &mut R) -> Result<(), BackendError> + Send + Sync + 'static,
    {
        let receiver = Arc::clone(&self.receiver);
        let invoker = move |input: &[u8], out: &mut Vec<u8>| {
            let arg: A = payload::decode(input).map_err(|e| {
                BackendError::new(
                    backend_kind::INVALID_ARGUMENT,
                    format!("cannot decode {}: {}", type_name::<A>(), e),
                )
            })?;
            let mut reply = R::default();
            f(&receiver, arg, &mut reply)?;
            payload::encode_into(out, &reply)
                .map_err(|e| BackendError::internal(format!("cannot encode reply: {}", e)))
        };

        self.methods.push(MethodDescriptor {
            name: name.to_string(),
            arg_type: type_name::<A>(),
            reply_type: type_name::<R>(),
            invoker: Box::new(invoker),
        });
        self
    }
}

impl<S> fmt::Debug for MethodSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSet")
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

/// A named group of methods sharing one receiver.
#[derive(Debug)]
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodDescriptor>>,
}

impl Service {
    pub(crate) fn new(name: String, methods: HashMap<String, Arc<MethodDescriptor>>) -> Self {
        Self { name, methods }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<&Arc<MethodDescriptor>> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<MethodDescriptor>> {
        self.methods.values()
    }
}

/// Why a method name cannot be exposed, if it cannot.
pub(crate) fn method_name_problem(name: &str) -> Option<&'static str> {
    match name.chars().next() {
        None => Some("name is empty"),
        Some(c) if !c.is_ascii_uppercase() => Some("name is not exported (must start uppercase)"),
        Some(_) if name.contains('.') => Some("name contains '.'"),
        Some(_) => None,
    }
}

/// Service name derived from the receiver's type: last path segment,
/// generic parameters stripped.
pub(crate) fn derived_service_name<S>() -> &'static str {
    let full = type_name::<S>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
