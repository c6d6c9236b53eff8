//! `llm-catcher demo`: failing functions under the wrappers
//!
//! Each step fails on purpose; the diagnosis is printed to stderr and the
//! failure continues exactly as it would without the wrapper.

use anyhow::{Context, Result};
use catcher_core::{install_panic_hook, Diagnoser, Fault, FaultKind};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::info;

fn divide(a: i32, b: i32) -> Result<i32, Fault> {
    Ok(a / b)
}

fn parse_quantity(raw: &str) -> Result<u32, Fault> {
    let quantity: u32 = raw.trim().parse()?;
    if quantity == 0 {
        return Err(Fault::new(FaultKind::InvalidInput, "quantity must be positive"));
    }
    Ok(quantity)
}

pub async fn run() -> Result<()> {
    let diagnoser = Arc::new(Diagnoser::from_env().context("Failed to initialize diagnoser")?);
    let _hook = install_panic_hook(Arc::clone(&diagnoser));

    info!("1/3 wrapped division by zero");
    let safe_divide = diagnoser.wrap(|(a, b): (i32, i32)| divide(a, b));
    if let Ok(quotient) = safe_divide((10, 2)) {
        println!("10 / 2 = {quotient}");
    }
    if panic::catch_unwind(AssertUnwindSafe(|| safe_divide((10, 0)))).is_err() {
        println!("division panicked; the panic was resumed after diagnosis");
    }

    info!("2/3 parse error through catch");
    if let Err(fault) = diagnoser.catch(|| parse_quantity("a dozen")) {
        println!("parse failed as expected: {fault}");
    }

    info!("3/3 missing file through catch_async");
    let read = diagnoser
        .catch_async(async { tokio::fs::read_to_string("does-not-exist.toml").await })
        .await;
    if let Err(e) = read {
        println!("read failed as expected: {e}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(" 12 ").unwrap(), 12);
        assert_eq!(
            parse_quantity("a dozen").unwrap_err().kind(),
            &FaultKind::Parse
        );
        assert_eq!(
            parse_quantity("0").unwrap_err().kind(),
            &FaultKind::InvalidInput
        );
    }
}
