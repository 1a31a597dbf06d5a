//! Live pipeline watching — `draftsync watch` and `draftsync start`.

use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use tracing::debug;

use draftsync::api::{ApiClient, GenerationApi, GenerationRequest, InputType};
use draftsync::config::Settings;
use draftsync::engine::GenerationEngine;
use draftsync::realtime::WsTransport;
use draftsync::reconciler::GenerationState;
use draftsync::ui::WatchUi;

/// Connect to a process and render its progress until it reaches a
/// terminal state or the user interrupts. With `interactive`, input
/// requests are answered through terminal prompts.
pub async fn cmd_watch(settings: &Settings, process_id: &str, interactive: bool) -> Result<()> {
    let token = settings.require_token()?;
    let user_id = settings.require_user_id()?;

    let transport = Arc::new(WsTransport::new(settings.realtime_url.clone()));
    let api = Arc::new(ApiClient::new(settings.api_url.clone(), token));
    let engine = GenerationEngine::new(transport, api, process_id, user_id, token);

    let ui = WatchUi::new(settings.verbose);
    let mut state = engine.state();
    let mut connection = engine.connection();
    ui.render(&state.borrow().clone());
    engine.connect().await;

    // Re-prompt only when a different decision comes up.
    let mut answered: Option<InputType> = None;
    let mut sections_seen = 0usize;

    loop {
        tokio::select! {
            changed = state.changed() => {
                changed.context("engine state channel closed")?;
                let snapshot = state.borrow().clone();
                ui.render(&snapshot);

                if snapshot.completed_sections.len() > sections_seen {
                    for (index, section) in snapshot.completed_sections.iter().skip(sections_seen) {
                        ui.section_done(*index, section.title.as_deref());
                    }
                    sections_seen = snapshot.completed_sections.len();
                }

                if snapshot.status.is_terminal() {
                    engine.disconnect().await;
                    ui.finish(&snapshot);
                    break;
                }

                if interactive && snapshot.is_waiting_for_input {
                    let Some(input) = snapshot.input_type else { continue };
                    if answered == Some(input) {
                        continue;
                    }
                    match answer_prompt(&engine, &ui, &snapshot, input).await {
                        // Deferred prompts (data not staged yet) stay
                        // unanswered so the next snapshot retries.
                        Ok(done) => answered = done.then_some(input),
                        Err(e) => {
                            ui.render(&state.borrow().clone());
                            eprintln!("{}", style(format!("Action failed: {e:#}")).red());
                            answered = None;
                        }
                    }
                } else if !snapshot.is_waiting_for_input {
                    answered = None;
                }
            }
            changed = connection.changed() => {
                changed.context("connection channel closed")?;
                ui.connection(&connection.borrow().clone());
            }
            _ = tokio::signal::ctrl_c() => {
                engine.disconnect().await;
                let snapshot = state.borrow().clone();
                ui.finish(&snapshot);
                break;
            }
        }
    }
    Ok(())
}

/// Kick off a new generation, print the process id, then watch it.
pub async fn cmd_start(
    settings: &Settings,
    keyword: &str,
    article_type: Option<String>,
    target_length: Option<u32>,
    interactive: bool,
) -> Result<()> {
    let token = settings.require_token()?;
    settings.require_user_id()?;

    let api = ApiClient::new(settings.api_url.clone(), token);
    let request = GenerationRequest {
        keyword: keyword.to_string(),
        article_type,
        target_length,
    };
    let response = api
        .start_generation(&request)
        .await
        .context("Failed to start generation")?;
    println!(
        "Started generation {} for keyword {}",
        style(&response.process_id).green(),
        style(keyword).bold()
    );

    cmd_watch(settings, &response.process_id, interactive).await
}

/// Answer one input request through a blocking terminal prompt, with the
/// progress bars suspended while it is on screen. Returns `false` when
/// the prompt was deferred because its data has not arrived yet.
async fn answer_prompt(
    engine: &GenerationEngine,
    ui: &WatchUi,
    state: &GenerationState,
    input: InputType,
) -> Result<bool> {
    debug!(input = %input, "prompting for user decision");
    match input {
        InputType::SelectPersona => {
            let items: Vec<String> = state
                .personas
                .iter()
                .map(|p| format!("{} — {}", p.name, p.description))
                .collect();
            if items.is_empty() {
                debug!("persona prompt deferred: no personas staged yet");
                return Ok(false);
            }
            let choice = prompt(ui, move || {
                Select::with_theme(&ColorfulTheme::default())
                    .with_prompt("Select a persona")
                    .items(&items)
                    .default(0)
                    .interact()
            })?;
            let persona_id = state.personas[choice].id.unwrap_or(choice as i64);
            engine.select_persona(persona_id).await?;
        }
        InputType::SelectTheme => {
            let items: Vec<String> = state
                .themes
                .iter()
                .map(|t| format!("{} — {}", t.title, t.description))
                .collect();
            if items.is_empty() {
                debug!("theme prompt deferred: no themes staged yet");
                return Ok(false);
            }
            let choice = prompt(ui, move || {
                Select::with_theme(&ColorfulTheme::default())
                    .with_prompt("Select a theme")
                    .items(&items)
                    .default(0)
                    .interact()
            })?;
            let theme_id = state.themes[choice].id.unwrap_or(choice as i64);
            engine.select_theme(theme_id).await?;
        }
        InputType::ApprovePlan => {
            let approved = prompt(ui, || {
                Confirm::new()
                    .with_prompt("Approve the research plan?")
                    .default(true)
                    .interact()
            })?;
            if approved {
                engine.approve_plan().await?;
            } else {
                println!("Plan left unapproved; the pipeline stays paused.");
            }
        }
        InputType::ApproveOutline => {
            let approved = prompt(ui, || {
                Confirm::new()
                    .with_prompt("Approve the outline?")
                    .default(true)
                    .interact()
            })?;
            if approved {
                engine.approve_outline().await?;
            } else {
                println!("Outline left unapproved; the pipeline stays paused.");
            }
        }
    }
    Ok(true)
}

/// Run a dialoguer prompt without starving the runtime or fighting the
/// progress bars for the terminal.
fn prompt<T>(ui: &WatchUi, f: impl FnOnce() -> dialoguer::Result<T>) -> Result<T> {
    tokio::task::block_in_place(|| ui.suspend(f)).context("Prompt failed")
}
