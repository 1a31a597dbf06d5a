//! One-shot process operations — `state`, `pause`, `resume`, `cancel`.

use anyhow::{Context, Result};
use console::style;

use draftsync::api::{ApiClient, GenerationApi};
use draftsync::config::Settings;
use draftsync::reconciler::{Reconciler, StepStatus, SyncOrigin};
use draftsync::ui::icons::{CHECK, CROSS};

/// Fetch the process once and print the reconciled snapshot.
pub async fn cmd_state(settings: &Settings, process_id: &str) -> Result<()> {
    let api = client(settings)?;
    let row = api
        .fetch_process(process_id)
        .await
        .context("Failed to fetch process state")?;

    let mut reconciler = Reconciler::new();
    reconciler.ingest_row(&row, SyncOrigin::Fetch);
    let state = reconciler.state();

    println!(
        "Process {} — {}",
        style(process_id).bold(),
        style(&state.status).cyan()
    );
    for step in &state.steps {
        let marker = match step.status {
            StepStatus::Completed => style("✔").green(),
            StepStatus::InProgress => style("▸").cyan(),
            StepStatus::Error => style("✘").red(),
            StepStatus::Pending => style("·").dim(),
        };
        println!("  {} {}", marker, step.name);
    }
    if state.is_waiting_for_input {
        let input = state
            .input_type
            .map(|t| t.as_str())
            .unwrap_or("user input");
        println!("  {}", style(format!("waiting for {input}")).yellow());
    }
    if !state.personas.is_empty() {
        println!("  personas: {}", state.personas.len());
    }
    if !state.themes.is_empty() {
        println!("  themes: {}", state.themes.len());
    }
    if state.outline.is_some() {
        println!("  outline: ready");
    }
    if !state.completed_sections.is_empty() {
        println!("  sections: {}", state.completed_sections.len());
    }
    if let Some(article_id) = &state.article_id {
        println!("  article: {article_id}");
    }
    if let Some(error) = &state.error {
        println!("  {}", style(error).red());
    }
    Ok(())
}

pub async fn cmd_pause(settings: &Settings, process_id: &str) -> Result<()> {
    let api = client(settings)?;
    report("pause", api.pause(process_id).await?);
    Ok(())
}

pub async fn cmd_resume(settings: &Settings, process_id: &str) -> Result<()> {
    let api = client(settings)?;
    report("resume", api.resume(process_id).await?);
    Ok(())
}

pub async fn cmd_cancel(settings: &Settings, process_id: &str) -> Result<()> {
    let api = client(settings)?;
    report("cancel", api.cancel(process_id).await?);
    Ok(())
}

fn client(settings: &Settings) -> Result<ApiClient> {
    let token = settings.require_token()?;
    Ok(ApiClient::new(settings.api_url.clone(), token))
}

fn report(operation: &str, success: bool) {
    if success {
        println!("{CHECK}{operation} accepted");
    } else {
        println!("{CROSS}{operation} rejected by the backend");
    }
}
