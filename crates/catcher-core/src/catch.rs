//! Function wrappers
//!
//! The wrappers never change control flow: an `Err` comes back unchanged
//! and a panic is resumed with its original payload, after the diagnosis
//! has been printed.
//!
//! Each failure is diagnosed once, by the innermost adapter it reaches. A
//! wrapper nested in another adapter hands its diagnosis outwards, so the
//! enclosing adapter reuses it instead of calling the backend again.

use crate::diagnoser::{banner, failure_message, Diagnoser};
use crate::error::Result as CoreResult;
use crate::fault::{AsFault, Fault};
use crate::runtime;
use crate::scope;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

impl Diagnoser {
    /// Run `f`, diagnosing an `Err` or panic before passing it on
    pub fn catch<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: AsFault,
    {
        let outcome = {
            let _scope = scope::enter();
            panic::catch_unwind(AssertUnwindSafe(f))
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                let fault = err.as_fault();
                if self.takes(&fault) {
                    self.present(&fault, self.blocking_diagnosis(&fault));
                }
                Err(err)
            }
            Err(payload) => {
                let fault = scope::recover(payload.as_ref());
                if self.takes(&fault) {
                    self.present(&fault, self.blocking_diagnosis(&fault));
                }
                panic::resume_unwind(payload)
            }
        }
    }

    /// Await `future`, diagnosing an `Err` or panic before passing it on
    pub async fn catch_async<T, E, Fut>(&self, future: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: AsFault,
    {
        let outcome = AssertUnwindSafe(scope::scoped(future))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                let fault = err.as_fault();
                if self.takes(&fault) {
                    let outcome = self.try_diagnose(&self.prepare_request(&fault)).await;
                    self.present(&fault, outcome);
                }
                Err(err)
            }
            Err(payload) => {
                let fault = scope::recover(payload.as_ref());
                if self.takes(&fault) {
                    let outcome = self.try_diagnose(&self.prepare_request(&fault)).await;
                    self.present(&fault, outcome);
                }
                panic::resume_unwind(payload)
            }
        }
    }

    /// Wrap a function so every call goes through [`Diagnoser::catch`]
    pub fn wrap<A, T, E, F>(self: &Arc<Self>, f: F) -> impl Fn(A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E>,
        E: AsFault,
    {
        let diagnoser = Arc::clone(self);
        move |arg| diagnoser.catch(|| f(arg))
    }

    /// Wrap an async function so every call goes through
    /// [`Diagnoser::catch_async`]
    pub fn wrap_async<A, T, E, F, Fut>(
        self: &Arc<Self>,
        f: F,
    ) -> impl Fn(A) -> BoxFuture<'static, Result<T, E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: AsFault + Send + 'static,
    {
        let diagnoser = Arc::clone(self);
        move |arg| {
            let diagnoser = Arc::clone(&diagnoser);
            let future = f(arg);
            async move { diagnoser.catch_async(future).await }.boxed()
        }
    }

    fn takes(&self, fault: &Fault) -> bool {
        if let Some(diagnosis) = scope::take_diagnosed(fault) {
            debug!(kind = %fault.kind(), "Fault already diagnosed by a nested adapter");
            scope::mark_diagnosed(fault, diagnosis);
            return false;
        }
        let eligible = self.should_handle(fault);
        if !eligible {
            debug!(kind = %fault.kind(), "Fault not eligible for diagnosis");
        }
        eligible
    }

    fn blocking_diagnosis(&self, fault: &Fault) -> CoreResult<String> {
        runtime::block_on(self.try_diagnose(&self.prepare_request(fault))).and_then(|inner| inner)
    }

    /// Print the outcome and hand it to an enclosing adapter
    fn present(&self, fault: &Fault, outcome: CoreResult<String>) {
        let diagnosis = match outcome {
            Ok(text) => {
                self.report(&banner(&text));
                text
            }
            Err(e) => {
                error!("Error during diagnosis: {e}");
                let text = failure_message(&e);
                self.report(&text);
                text
            }
        };
        scope::mark_diagnosed(fault, diagnosis);
    }
}
