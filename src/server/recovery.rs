//! Fault boundary around method invocations.
//!
//! Each invocation runs on the blocking pool so a slow or blocking method
//! cannot stall the connection's read loop. A panic inside the method ends
//! that task only; it comes back as a `JoinError` and is turned into an
//! `InternalError` for the caller.

use bytes::Bytes;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;

use crate::registry::MethodDescriptor;
use crate::types::{backend_kind, BackendError};

/// Invoke `descriptor` in its own task, writing the encoded reply into `out`.
///
/// On timeout the task is abandoned, not cancelled: blocking code cannot be
/// interrupted, so the method keeps running until it returns on its own.
pub async fn invoke_isolated(
    descriptor: Arc<MethodDescriptor>,
    payload: Bytes,
    mut out: Vec<u8>,
    timeout: Duration,
) -> Result<Vec<u8>, BackendError> {
    let method = descriptor.name().to_string();
    let handle = tokio::task::spawn_blocking(move || {
        descriptor.invoke(&payload, &mut out).map(|()| out)
    });

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(join_error_to_backend(&method, join_err)),
        Err(_elapsed) => {
            tracing::warn!(method = %method, "invocation timed out after {:?}", timeout);
            Err(BackendError::new(
                backend_kind::TIMEOUT,
                format!("rpc: method {} did not finish within {:?}", method, timeout),
            ))
        }
    }
}

fn join_error_to_backend(method: &str, err: JoinError) -> BackendError {
    if err.is_panic() {
        let panic_msg = extract_panic_message(&*err.into_panic());
        tracing::error!("panic_recovered: method={}, panic={}", method, panic_msg);
        BackendError::internal(panic_msg)
    } else {
        BackendError::internal(format!("rpc: invocation of {} was cancelled", method))
    }
}

/// Extract panic message from panic payload.
fn extract_panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (no message)".to_string()
    }
}
