//! The client-owned generation state — the single source of truth for
//! rendering pipeline progress.
//!
//! All mutation goes through methods that preserve three invariants:
//! steps below the current index are completed (sticky terminals aside),
//! populated artifacts are never overwritten with emptiness, and waiting
//! flags stay consistent with the current step's validity table.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::api::models::{ArticleContext, InputType, Persona, ProcessStatus, Theme};
use crate::reconciler::steps::{STEP_ORDER, StepId, StepStatus};

/// One entry in the ordered step display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepState {
    pub id: StepId,
    pub name: &'static str,
    pub status: StepStatus,
}

impl StepState {
    fn pending(id: StepId) -> Self {
        Self {
            id,
            name: id.display_name(),
            status: StepStatus::Pending,
        }
    }
}

/// A section produced by the writing stage, keyed externally by index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedSection {
    pub title: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationState {
    pub current_step: StepId,
    pub steps: Vec<StepState>,
    pub status: ProcessStatus,
    pub is_waiting_for_input: bool,
    pub input_type: Option<InputType>,
    pub personas: Vec<Persona>,
    pub themes: Vec<Theme>,
    pub research_plan: Option<Value>,
    pub outline: Option<Value>,
    pub generated_content: String,
    pub completed_sections: BTreeMap<u32, CompletedSection>,
    pub final_article: Option<Value>,
    pub article_id: Option<String>,
    pub current_section_index: Option<u32>,
    pub error: Option<String>,
}

impl Default for GenerationState {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationState {
    pub fn new() -> Self {
        Self {
            current_step: StepId::KeywordAnalyzing,
            steps: STEP_ORDER.iter().copied().map(StepState::pending).collect(),
            status: ProcessStatus::Pending,
            is_waiting_for_input: false,
            input_type: None,
            personas: Vec::new(),
            themes: Vec::new(),
            research_plan: None,
            outline: None,
            generated_content: String::new(),
            completed_sections: BTreeMap::new(),
            final_article: None,
            article_id: None,
            current_section_index: None,
            error: None,
        }
    }

    pub fn step_index(&self) -> usize {
        self.current_step.index()
    }

    /// Move the current step and realign per-step statuses: everything
    /// below becomes completed, the target takes `live`, everything above
    /// returns to pending. Terminal statuses are sticky and skipped.
    ///
    /// Callers enforce monotonicity; this method applies whatever target
    /// it is given (reset paths legitimately move backwards by replacing
    /// the whole state instead).
    pub fn advance_to(&mut self, step: StepId, live: StepStatus) {
        self.current_step = step;
        let idx = step.index();
        for entry in &mut self.steps {
            if entry.status.is_terminal() {
                continue;
            }
            let i = entry.id.index();
            entry.status = if i < idx {
                StepStatus::Completed
            } else if i == idx {
                live
            } else {
                StepStatus::Pending
            };
        }
    }

    /// Set a single step's status. No-op when the step already holds a
    /// terminal status.
    pub fn mark_step(&mut self, step: StepId, status: StepStatus) {
        if let Some(entry) = self.steps.iter_mut().find(|s| s.id == step) {
            if entry.status.is_terminal() {
                return;
            }
            entry.status = status;
        }
    }

    pub fn step_status(&self, step: StepId) -> StepStatus {
        self.steps
            .iter()
            .find(|s| s.id == step)
            .map(|s| s.status)
            .unwrap_or(StepStatus::Pending)
    }

    pub fn set_waiting(&mut self, input: Option<InputType>) {
        self.is_waiting_for_input = true;
        self.input_type = input;
    }

    pub fn clear_waiting(&mut self) {
        self.is_waiting_for_input = false;
        self.input_type = None;
    }

    /// Enforce waiting-state consistency after any mutation:
    /// - an input type invalid for the current step is cleared;
    /// - a waiting flag with no input type is cleared;
    /// - waiting without its supporting artifact is cleared, except
    ///   outline approval, whose outline may arrive via a later sync;
    /// - terminal process statuses never wait.
    pub fn sanitize_waiting(&mut self) {
        if !self.is_waiting_for_input {
            return;
        }
        if self.status.is_terminal() {
            self.clear_waiting();
            return;
        }
        let Some(input) = self.input_type else {
            self.clear_waiting();
            return;
        };
        if self.current_step.valid_input() != Some(input) {
            self.clear_waiting();
            return;
        }
        let has_data = match input {
            InputType::SelectPersona => !self.personas.is_empty(),
            InputType::SelectTheme => !self.themes.is_empty(),
            InputType::ApprovePlan => self.research_plan.is_some(),
            // The outline frequently lands in a later sync than the
            // input request itself.
            InputType::ApproveOutline => true,
        };
        if !has_data {
            self.clear_waiting();
        }
    }

    /// Merge accumulated artifacts. A populated incoming field replaces
    /// the local one; an absent or empty incoming field never clears it.
    pub fn merge_artifacts(&mut self, ctx: &ArticleContext) {
        if let Some(personas) = ctx.personas.as_ref().filter(|p| !p.is_empty()) {
            self.personas = personas.clone();
        }
        if let Some(themes) = ctx.themes.as_ref().filter(|t| !t.is_empty()) {
            self.themes = themes.clone();
        }
        if let Some(plan) = ctx.research_plan.as_ref().filter(|v| !v.is_null()) {
            self.research_plan = Some(plan.clone());
        }
        if let Some(outline) = ctx.outline.as_ref().filter(|v| !v.is_null()) {
            self.outline = Some(outline.clone());
        }
        if let Some(content) = ctx.generated_content.as_ref().filter(|c| !c.is_empty()) {
            self.generated_content = content.clone();
        }
        if let Some(article) = ctx.final_article.as_ref().filter(|v| !v.is_null()) {
            self.final_article = Some(article.clone());
        }
        if let Some(id) = ctx.article_id.as_ref().filter(|id| !id.is_empty()) {
            self.article_id = Some(id.clone());
        }
        if let Some(index) = ctx.current_section_index {
            self.current_section_index = Some(index);
        }
        if let Some(sections) = ctx.sections.as_ref().filter(|s| !s.is_empty()) {
            for section in sections {
                if let Some(index) = section.section_index {
                    self.upsert_section(index, section.title.clone(), section.content.clone());
                }
            }
        }
    }

    /// Insert or replace a completed section and regenerate the
    /// accumulated content from all sections in index order.
    pub fn upsert_section(&mut self, index: u32, title: Option<String>, content: String) {
        self.completed_sections
            .insert(index, CompletedSection { title, content });
        self.rebuild_generated_content();
    }

    fn rebuild_generated_content(&mut self) {
        self.generated_content = self
            .completed_sections
            .values()
            .filter(|s| !s.content.is_empty())
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
    }

    /// Terminal success: every step completed, waiting cleared.
    pub fn complete_all(&mut self) {
        for entry in &mut self.steps {
            entry.status = StepStatus::Completed;
        }
        self.current_step = StepId::Editing;
        self.status = ProcessStatus::Completed;
        self.clear_waiting();
    }

    /// Terminal failure: the current step is marked errored regardless of
    /// its previous status.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let step = self.current_step;
        if let Some(entry) = self.steps.iter_mut().find(|s| s.id == step) {
            entry.status = StepStatus::Error;
        }
        self.status = ProcessStatus::Error;
        self.error = Some(message.into());
        self.clear_waiting();
    }
}
