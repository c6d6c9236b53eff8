//! `llm-catcher config`: print the resolved configuration

use anyhow::{Context, Result};
use catcher_core::{DispatchPolicy, Settings};
use catcher_llm::util::mask_api_key;

pub fn run(json: bool) -> Result<()> {
    let settings = Settings::resolve().context("Failed to resolve settings")?;
    let settings = masked(settings);

    if json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    print!("{}", render(&settings));
    Ok(())
}

fn masked(mut settings: Settings) -> Settings {
    settings.openai_api_key = settings.openai_api_key.as_deref().map(mask_api_key);
    settings
}

fn render(settings: &Settings) -> String {
    let policy = DispatchPolicy::from_settings(settings);
    let mut out = String::new();

    let row = |out: &mut String, key: &str, value: &str| {
        out.push_str(&format!("  {key:<22} {value}\n"));
    };

    out.push_str("LLM\n");
    row(&mut out, "provider", settings.provider.as_str());
    row(&mut out, "llm_model", &settings.llm_model);
    row(&mut out, "temperature", &settings.temperature.to_string());
    row(
        &mut out,
        "openai_api_key",
        settings.openai_api_key.as_deref().unwrap_or("(not set)"),
    );
    if let Some(url) = &settings.openai_base_url {
        row(&mut out, "openai_base_url", url);
    }
    if let Some(url) = &settings.ollama_base_url {
        row(&mut out, "ollama_base_url", url);
    }
    row(
        &mut out,
        "request_timeout_secs",
        &settings.request_timeout_secs.to_string(),
    );

    out.push_str("\nDispatch\n");
    row(&mut out, "mode", policy.mode().as_str());
    row(&mut out, "handled_exceptions", &settings.handled_exceptions.join(", "));
    let ignored = if settings.ignore_exceptions.is_empty() {
        "(none)".to_string()
    } else {
        settings.ignore_exceptions.join(", ")
    };
    row(&mut out, "ignore_exceptions", &ignored);

    if !settings.custom_handlers.is_empty() {
        out.push_str("\nCustom handlers\n");
        let mut kinds: Vec<_> = settings.custom_handlers.iter().collect();
        kinds.sort();
        for (kind, prompt) in kinds {
            row(&mut out, kind, prompt);
        }
    }

    out
}
