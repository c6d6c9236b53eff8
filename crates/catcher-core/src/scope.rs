//! Adapter scope tracking
//!
//! While a wrapper or the middleware is running user code, panics on that
//! thread belong to the adapter, not to the process-wide hook. The hook
//! checks [`is_active`] and, when it is, stashes the located [`Fault`] for
//! the adapter to pick up after `catch_unwind`.
//!
//! A nested adapter that diagnoses a failure records the result with
//! [`mark_diagnosed`]; an enclosing adapter that sees the same failure takes
//! it with [`take_diagnosed`] instead of calling the backend again.

use crate::fault::Fault;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static STASHED: RefCell<Option<Fault>> = const { RefCell::new(None) };
    static DIAGNOSED: RefCell<Option<(String, String)>> = const { RefCell::new(None) };
}

/// Whether the current thread is inside an adapter scope
#[must_use]
pub fn is_active() -> bool {
    DEPTH.with(Cell::get) > 0
}

/// Marks the current thread as inside an adapter until dropped
#[must_use = "the scope ends when the guard is dropped"]
pub struct ScopeGuard {
    _not_send: PhantomData<*const ()>,
}

/// Enter an adapter scope
pub fn enter() -> ScopeGuard {
    DEPTH.with(|depth| {
        if depth.get() == 0 {
            STASHED.with(|slot| slot.borrow_mut().take());
            DIAGNOSED.with(|slot| slot.borrow_mut().take());
        }
        depth.set(depth.get() + 1);
    });
    ScopeGuard {
        _not_send: PhantomData,
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Hand a fault built by the panic hook to the enclosing adapter
pub fn stash(fault: Fault) {
    STASHED.with(|slot| *slot.borrow_mut() = Some(fault));
}

/// Take the fault stashed by the panic hook, if any
pub fn take_stashed() -> Option<Fault> {
    STASHED.with(|slot| slot.borrow_mut().take())
}

/// Record the diagnosis a nested adapter produced for `fault`
///
/// Only kept while an enclosing adapter scope is active.
pub fn mark_diagnosed(fault: &Fault, diagnosis: impl Into<String>) {
    if is_active() {
        DIAGNOSED.with(|slot| *slot.borrow_mut() = Some((fault.summary(), diagnosis.into())));
    }
}

/// Diagnosis already produced for `fault` by a nested adapter, if any
#[must_use]
pub fn take_diagnosed(fault: &Fault) -> Option<String> {
    DIAGNOSED.with(|slot| {
        let mut slot = slot.borrow_mut();
        match slot.take() {
            Some((summary, diagnosis)) if summary == fault.summary() => Some(diagnosis),
            other => {
                *slot = other;
                None
            }
        }
    })
}

/// Fault for a payload caught with `catch_unwind`
///
/// Prefers the hook's located fault when it describes the same panic.
#[must_use]
pub fn recover(payload: &(dyn Any + Send)) -> Fault {
    let caught = Fault::from_panic_payload(payload);
    match take_stashed() {
        Some(stashed) if stashed.message() == caught.message() => stashed,
        _ => caught,
    }
}

/// Future that is inside an adapter scope on every poll
pub struct Scoped<F> {
    inner: Pin<Box<F>>,
}

/// Wrap a future so each poll runs inside an adapter scope
pub fn scoped<F: Future>(future: F) -> Scoped<F> {
    Scoped {
        inner: Box::pin(future),
    }
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _guard = enter();
        self.inner.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;

    #[test]
    fn test_guard_nesting() {
        assert!(!is_active());
        {
            let _outer = enter();
            assert!(is_active());
            {
                let _inner = enter();
                assert!(is_active());
            }
            assert!(is_active());
        }
        assert!(!is_active());
    }

    #[test]
    fn test_guard_released_on_unwind() {
        let result = std::panic::catch_unwind(|| {
            let _guard = enter();
            panic!("inside");
        });
        assert!(result.is_err());
        assert!(!is_active());
    }

    #[test]
    fn test_recover_prefers_matching_stash() {
        let _guard = enter();
        stash(Fault::new(FaultKind::DivideByZero, "attempt to divide by zero").with_parent(FaultKind::Panic));

        let payload: Box<dyn Any + Send> = Box::new("attempt to divide by zero");
        let fault = recover(payload.as_ref());
        assert_eq!(fault.kind(), &FaultKind::DivideByZero);
        assert!(take_stashed().is_none());
    }

    #[test]
    fn test_recover_ignores_stale_stash() {
        let _guard = enter();
        stash(Fault::new(FaultKind::Timeout, "an older panic"));

        let payload: Box<dyn Any + Send> = Box::new(String::from("fresh panic"));
        let fault = recover(payload.as_ref());
        assert_eq!(fault.message(), "fresh panic");
    }

    #[test]
    fn test_diagnosis_handed_to_enclosing_adapter() {
        let fault = Fault::new(FaultKind::InvalidInput, "bad input");
        let _outer = enter();
        {
            let _inner = enter();
        }
        mark_diagnosed(&fault, "check the input");

        let other = Fault::new(FaultKind::InvalidInput, "another input");
        assert_eq!(take_diagnosed(&other), None);
        assert_eq!(take_diagnosed(&fault).as_deref(), Some("check the input"));
        assert_eq!(take_diagnosed(&fault), None);
    }

    #[test]
    fn test_diagnosis_not_kept_outside_scope() {
        let fault = Fault::new(FaultKind::InvalidInput, "bad input");
        mark_diagnosed(&fault, "check the input");
        assert_eq!(take_diagnosed(&fault), None);

        {
            let _scope = enter();
            mark_diagnosed(&fault, "stale");
        }
        let _next = enter();
        assert_eq!(take_diagnosed(&fault), None);
    }

    #[test]
    fn test_scoped_future_is_inside_scope_when_polled() {
        let observed = tokio_test::block_on(scoped(async { is_active() }));
        assert!(observed);
        assert!(!is_active());
    }
}
