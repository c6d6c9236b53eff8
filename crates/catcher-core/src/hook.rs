//! Process-wide panic hook
//!
//! [`install`] replaces the panic hook and returns a guard that puts the
//! previous hook back when dropped. The installed hook:
//!
//! - defers panics raised inside an adapter scope to that adapter,
//! - passes ignored and ineligible panics straight to the previous hook,
//! - diagnoses everything else and prints the banner, falling back to the
//!   previous hook when the backend cannot be reached.

use crate::diagnoser::{banner, Diagnoser};
use crate::fault::Fault;
use crate::runtime;
use crate::scope;
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;
use tracing::{debug, error, info};

type SharedHook = Arc<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static>;

/// Restores the previous panic hook when dropped
#[must_use = "dropping the guard uninstalls the hook immediately"]
pub struct PanicHookGuard {
    previous: Option<SharedHook>,
}

impl PanicHookGuard {
    /// Keep the hook installed for the rest of the process
    pub fn persist(mut self) {
        self.previous = None;
    }
}

impl Drop for PanicHookGuard {
    fn drop(&mut self) {
        // set_hook panics on a panicking thread
        if std::thread::panicking() {
            return;
        }
        if let Some(previous) = self.previous.take() {
            panic::set_hook(Box::new(move |info| previous(info)));
            debug!("Restored previous panic hook");
        }
    }
}

/// Install the diagnosing panic hook, chaining to the current one
pub fn install(diagnoser: Arc<Diagnoser>) -> PanicHookGuard {
    let previous: SharedHook = Arc::from(panic::take_hook());
    let chained = Arc::clone(&previous);

    panic::set_hook(Box::new(move |info| {
        on_panic(&diagnoser, chained.as_ref(), info);
    }));
    info!("Installed LLM diagnosis panic hook");

    PanicHookGuard {
        previous: Some(previous),
    }
}

fn on_panic(
    diagnoser: &Diagnoser,
    previous: &(dyn Fn(&PanicHookInfo<'_>) + Send + Sync),
    info: &PanicHookInfo<'_>,
) {
    let fault = Fault::from_panic(info);

    if scope::is_active() {
        scope::stash(fault);
        previous(info);
        return;
    }

    if !diagnoser.should_handle(&fault) {
        previous(info);
        return;
    }

    let request = diagnoser.prepare_request(&fault);
    match runtime::block_on(diagnoser.try_diagnose(&request)) {
        Ok(Ok(text)) => diagnoser.report(&banner(&text)),
        Ok(Err(e)) | Err(e) => {
            error!("Error in global panic hook: {e}");
            previous(info);
        }
    }
}
