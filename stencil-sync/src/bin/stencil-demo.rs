//! STENCIL demo binary.
//!
//! Runs two scenarios against an in-memory service and prints each result
//! as JSON on stdout:
//!
//! 1. Two concurrent live edits to disjoint fields of one template.
//! 2. A background recomputation racing a fresh live edit, then retried
//!    once the cooldown has passed.
//!
//! Usage:
//!   STENCIL_BG_COOLDOWN_MS=500 cargo run -p stencil-sync --bin stencil-demo

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stencil_core::{
    Clock, ConfigError, FieldDefinition, FieldKind, Section, StencilConfig, StoreError, Template,
    TemplateId, TemplatePatch, UpdateResponse,
};
use stencil_sync::{init_tracing, InMemoryTemplateService, LogFormat, TelemetryError, TemplateService};
use thiserror::Error;

#[derive(Debug, Error)]
enum DemoError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Template {0} disappeared")]
    Missing(TemplateId),
}

#[tokio::main]
async fn main() -> Result<(), DemoError> {
    init_tracing(LogFormat::from_env())?;

    let config = StencilConfig::from_env();
    let service = Arc::new(TemplateService::in_memory(config)?);

    concurrent_edits(&service).await?;
    background_deference(&service).await?;

    Ok(())
}

fn seed(service: &InMemoryTemplateService, id: &str) -> Result<TemplateId, DemoError> {
    let mut template = Template::new(id, "Patient intake", service.clock().now());
    template.sections = vec![Section::new("personal", "Personal").with_fields(["full_name"])];
    template.field_definitions.insert(
        "full_name".to_string(),
        FieldDefinition::new("Full name", FieldKind::Text).required(),
    );
    template
        .field_definitions
        .insert("notes".to_string(), FieldDefinition::new("Notes", FieldKind::Text));
    Ok(service.store().insert(template)?.id)
}

async fn concurrent_edits(service: &Arc<InMemoryTemplateService>) -> Result<(), DemoError> {
    let id = seed(service, "t1")?;

    let rename = {
        let service = Arc::clone(service);
        let id = id.clone();
        tokio::spawn(async move {
            service
                .update_template(&id, TemplatePatch::new().name("A"), None)
                .await
        })
    };
    let describe = {
        let service = Arc::clone(service);
        let id = id.clone();
        tokio::spawn(async move {
            service
                .update_template(&id, TemplatePatch::new().description("B"), None)
                .await
        })
    };

    let (rename, describe) = (rename.await?, describe.await?);
    let final_state = service
        .get_template(&id)
        .await?
        .ok_or_else(|| DemoError::Missing(id.clone()))?;

    print_json(&json!({
        "scenario": "concurrent_edits",
        "rename": UpdateResponse::from(rename),
        "describe": UpdateResponse::from(describe),
        "final": {
            "name": final_state.name,
            "description": final_state.description,
            "version": final_state.version,
        },
    }));
    Ok(())
}

async fn background_deference(service: &Arc<InMemoryTemplateService>) -> Result<(), DemoError> {
    let id = seed(service, "t2")?;

    let immediate = service.process_record(&id).await;

    let cooldown_ms = service.config().background.cooldown_ms;
    tracing::info!(cooldown_ms, "Waiting out the cooldown");
    tokio::time::sleep(Duration::from_millis(cooldown_ms)).await;

    let later = service.process_record(&id).await;
    let final_state = service
        .get_template(&id)
        .await?
        .ok_or_else(|| DemoError::Missing(id.clone()))?;

    print_json(&json!({
        "scenario": "background_deference",
        "immediate": immediate.as_str(),
        "afterCooldown": later.as_str(),
        "final": {
            "name": final_state.name,
            "version": final_state.version,
            "derived": final_state.derived,
        },
    }));
    Ok(())
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize result: {}", e),
    }
}
