//! `llm-catcher diagnose`: diagnose a stack trace captured elsewhere

use anyhow::{bail, Context, Result};
use catcher_core::{DiagnosisFormat, DiagnosisRequest, Diagnoser};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

pub async fn run(file: Option<PathBuf>, plain: bool) -> Result<()> {
    let trace = match &file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read trace from stdin")?;
            buf
        }
    };

    if trace.trim().is_empty() {
        bail!("No stack trace given");
    }

    let diagnoser = Diagnoser::from_env().context("Failed to initialize diagnoser")?;
    let format = if plain {
        DiagnosisFormat::Plain
    } else {
        DiagnosisFormat::Banner
    };

    let diagnosis = diagnoser
        .async_diagnose_request(DiagnosisRequest::from_trace(trace), format)
        .await;
    println!("{diagnosis}");
    Ok(())
}
