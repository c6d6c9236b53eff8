//! Driving diagnosis futures from synchronous code

use crate::error::{Error, Result};
use std::future::Future;
use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};

/// Run `future` to completion from a synchronous context
///
/// - inside a multi-thread tokio runtime: `block_in_place` on the current
///   handle
/// - inside a current-thread runtime: on a scoped helper thread with its own
///   runtime, since that runtime cannot be blocked from within
/// - outside any runtime: on a fresh current-thread runtime
///
/// # Errors
/// Returns `Error::Runtime` if a runtime cannot be built or the helper thread
/// dies.
pub fn block_on<F>(future: F) -> Result<F::Output>
where
    F: Future + Send,
    F::Output: Send,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            Ok(tokio::task::block_in_place(|| handle.block_on(future)))
        }
        Ok(_) => std::thread::scope(|scope| {
            scope
                .spawn(|| fresh_runtime().map(|rt| rt.block_on(future)))
                .join()
                .map_err(|_| Error::Runtime("diagnosis thread panicked".to_string()))?
        }),
        Err(_) => Ok(fresh_runtime()?.block_on(future)),
    }
}

fn fresh_runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Runtime(format!("failed to build runtime: {e}")))
}
