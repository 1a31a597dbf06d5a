//! State reconciliation — projects an unordered, duplicate-prone stream
//! of pipeline notifications onto a strictly monotonic step state machine.
//!
//! ## Ingestion path
//!
//! ```text
//!                discrete events            full-row syncs / fetches
//!                      │                              │
//!                      v                              v
//!              ┌─ recent-key set ─┐          ┌─ recent-key set ─┐
//!              │  (redeliveries)  │          │  (redeliveries)  │
//!              └────────┬─────────┘          └────────┬─────────┘
//!                       v                             v
//!             per-type handlers            fingerprint throttle (500ms)
//!          (step/input/section/...)                   │
//!                       │                   updated_at staleness guard
//!                       │                             │
//!                       └──────────┬──────────────────┘
//!                                  v
//!                  monotonic step clamp + status/artifact
//!                  merge + waiting-state sanitation
//! ```
//!
//! Full-row syncs are authoritative: their statuses, artifacts, and
//! waiting flags always apply, but the current step only moves forward.
//! Event-sourced snapshots that would regress the step are discarded
//! whole.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::debug;

use crate::api::models::{
    InputRequest, InputType, PipelineEvent, ProcessEvent, ProcessStateRow, ProcessStatus,
    SectionPayload, StateSnapshot,
};

pub mod dedup;
pub mod state;
pub mod steps;

pub use state::{CompletedSection, GenerationState, StepState};
pub use steps::{STEP_ORDER, StepId, StepStatus};

use dedup::{Fingerprint, FingerprintThrottle, RecentKeys};

/// Grace period when comparing `updated_at` stamps, so near-simultaneous
/// writes are not rejected as stale.
pub const STALENESS_TOLERANCE_SECS: i64 = 10;

/// Where a full-row snapshot came from. Both origins are authoritative;
/// the distinction only matters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOrigin {
    RowUpdate,
    Fetch,
}

/// Waiting flags captured before an optimistic submission, used to roll
/// the state back when the HTTP call fails.
#[derive(Debug, Clone, Copy)]
pub struct WaitingGuard {
    input_type: Option<InputType>,
}

/// Per-process reconciler. Owns the [`GenerationState`] and every filter
/// protecting it.
pub struct Reconciler {
    state: GenerationState,
    recent: RecentKeys,
    throttle: FingerprintThrottle,
    last_applied_at: Option<DateTime<Utc>>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            state: GenerationState::new(),
            recent: RecentKeys::default(),
            throttle: FingerprintThrottle::default(),
            last_applied_at: None,
        }
    }

    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    /// Discard everything and return to the initial all-pending state.
    /// Used when a new generation starts on this engine.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Ingest one discrete event. Returns `true` when the event changed
    /// the state, `false` when it was discarded or unrecognized.
    pub fn ingest_event(&mut self, event: &ProcessEvent) -> bool {
        if !self.recent.insert(dedup::event_key(event)) {
            debug!(
                event_type = %event.event_type,
                event_id = %event.id,
                "discarding redelivered event"
            );
            return false;
        }

        match PipelineEvent::from_event(event) {
            PipelineEvent::StateUpdated(snapshot) => self.ingest_snapshot(&snapshot, false),
            PipelineEvent::GenerationStarted => self.on_generation_started(),
            PipelineEvent::StepStarted { step } => self.on_step_started(&step),
            PipelineEvent::StepCompleted { step } => self.on_step_completed(&step),
            PipelineEvent::UserInputRequired(request) => self.on_input_required(request),
            PipelineEvent::UserInputResolved { input_type } => self.on_input_resolved(input_type),
            PipelineEvent::ContentChunk { content } => self.on_content_chunk(&content),
            PipelineEvent::SectionCompleted(payload) => self.on_section_completed(payload),
            PipelineEvent::GenerationCompleted {
                final_article,
                article_id,
            } => self.on_generation_completed(final_article, article_id),
            PipelineEvent::GenerationError { message } => {
                self.state.record_error(message);
                true
            }
            PipelineEvent::GenerationPaused => self.on_status_transition(ProcessStatus::Paused),
            PipelineEvent::GenerationCancelled => {
                let applied = self.on_status_transition(ProcessStatus::Cancelled);
                if applied {
                    self.state.clear_waiting();
                }
                applied
            }
            PipelineEvent::Unknown { event_type } => {
                debug!(%event_type, "ignoring unrecognized event type");
                false
            }
        }
    }

    /// Ingest a full-row sync (row-update notification or manual fetch).
    pub fn ingest_row(&mut self, row: &ProcessStateRow, origin: SyncOrigin) -> bool {
        if !self.recent.insert(dedup::row_key(row)) {
            debug!(process_id = %row.id, ?origin, "discarding redelivered row sync");
            return false;
        }
        let applied = self.ingest_snapshot(&row.state, true);
        if applied {
            debug!(process_id = %row.id, ?origin, "applied full-row sync");
        }
        applied
    }

    /// Capture the waiting flags and optimistically stop waiting while a
    /// submission is in flight. The authoritative transition arrives via
    /// the next event or sync; on HTTP failure the caller rolls back.
    pub fn begin_submission(&mut self) -> WaitingGuard {
        let guard = WaitingGuard {
            input_type: self.state.input_type,
        };
        self.state.is_waiting_for_input = false;
        guard
    }

    /// Restore the waiting state captured by [`Self::begin_submission`]
    /// and surface the failure message.
    pub fn rollback_submission(&mut self, guard: WaitingGuard, message: impl Into<String>) {
        self.state.is_waiting_for_input = true;
        self.state.input_type = guard.input_type;
        self.state.error = Some(message.into());
    }

    /// The unified snapshot path shared by `process_state_updated` events
    /// and full-row syncs.
    fn ingest_snapshot(&mut self, snapshot: &StateSnapshot, authoritative: bool) -> bool {
        if *snapshot == StateSnapshot::default() {
            debug!("ignoring empty snapshot");
            return false;
        }

        let fingerprint = Fingerprint::of(snapshot);
        if self.throttle.is_redundant(&fingerprint) {
            debug!("discarding snapshot: identical fingerprint within throttle window");
            return false;
        }

        if let (Some(incoming), Some(applied)) = (snapshot.updated_at, self.last_applied_at) {
            if applied.signed_duration_since(incoming)
                > ChronoDuration::seconds(STALENESS_TOLERANCE_SECS)
            {
                debug!(%incoming, %applied, "discarding stale snapshot");
                return false;
            }
        }

        let backend_name = snapshot.backend_step();
        let candidate = backend_name.and_then(StepId::from_backend);
        if let Some(name) = backend_name {
            if candidate.is_none() {
                debug!(step = %name, "unmapped backend step name");
            } else if StepId::is_milestone(name)
                && snapshot.status == Some(ProcessStatus::UserInputRequired)
            {
                // Milestones pin the step to their stage while the
                // backend holds for a user decision.
                debug!(step = %name, "holding at milestone for user decision");
            }
        }

        // An event-sourced snapshot that would move the step backwards is
        // a replayed stale state: drop it whole, artifacts included.
        if !authoritative {
            if let Some(step) = candidate {
                if step.index() < self.state.step_index() {
                    debug!(
                        candidate = %step,
                        current = %self.state.current_step,
                        "discarding snapshot regressing the step"
                    );
                    return false;
                }
            }
        }

        if let Some(status) = &snapshot.status {
            if authoritative || !self.state.status.is_terminal() {
                self.state.status = status.clone();
            }
        }

        // Apply the step, clamped so authoritative rows never regress it.
        if let Some(step) = candidate {
            let target = if step.index() >= self.state.step_index() {
                step
            } else {
                self.state.current_step
            };
            self.state.advance_to(target, StepStatus::InProgress);
        }

        if let Some(ctx) = &snapshot.article_context {
            self.state.merge_artifacts(ctx);
        }

        // Waiting flags apply only when the snapshot says something about
        // them; silence never clears a prompt that is still valid.
        let waiting_signal = snapshot.is_waiting_for_input.or(
            if snapshot.status == Some(ProcessStatus::UserInputRequired) {
                Some(true)
            } else {
                None
            },
        );
        match waiting_signal {
            Some(true) => {
                let input = snapshot
                    .effective_input_type()
                    .and_then(|s| s.parse::<InputType>().ok())
                    .or(self.state.input_type);
                self.state.set_waiting(input);
            }
            Some(false) => self.state.clear_waiting(),
            None => {}
        }

        match self.state.status {
            ProcessStatus::Completed => self.state.complete_all(),
            ProcessStatus::Error => {
                let message = self
                    .state
                    .error
                    .clone()
                    .unwrap_or_else(|| "Generation failed".to_string());
                self.state.record_error(message);
            }
            ProcessStatus::Cancelled => self.state.clear_waiting(),
            _ => {}
        }

        self.state.sanitize_waiting();

        if let Some(stamp) = snapshot.updated_at {
            self.last_applied_at = Some(self.last_applied_at.map_or(stamp, |prev| prev.max(stamp)));
        }
        true
    }

    fn on_generation_started(&mut self) -> bool {
        if self.state.step_index() == 0 {
            self.state
                .advance_to(StepId::KeywordAnalyzing, StepStatus::InProgress);
        }
        if !self.state.status.is_terminal() {
            self.state.status = ProcessStatus::Running;
        }
        true
    }

    fn on_step_started(&mut self, name: &str) -> bool {
        let Some(step) = StepId::from_backend(name) else {
            debug!(step = %name, "ignoring step_started for unmapped step");
            return false;
        };
        if step.index() < self.state.step_index() {
            debug!(step = %step, "discarding step_started behind current step");
            return false;
        }
        self.state.advance_to(step, StepStatus::InProgress);
        if !self.state.status.is_terminal() {
            self.state.status = ProcessStatus::Running;
        }
        self.state.sanitize_waiting();
        true
    }

    fn on_step_completed(&mut self, name: &str) -> bool {
        let Some(step) = StepId::from_backend(name) else {
            debug!(step = %name, "ignoring step_completed for unmapped step");
            return false;
        };
        if step.index() < self.state.step_index() {
            // Delayed completion of an already-superseded step.
            debug!(step = %step, "discarding delayed completion");
            return false;
        }
        self.state.advance_to(step, StepStatus::Completed);
        if !self.state.is_waiting_for_input {
            if let Some(next) = step.next() {
                self.state.advance_to(next, StepStatus::InProgress);
            }
        }
        if !self.state.status.is_terminal() {
            self.state.status = ProcessStatus::Running;
        }
        self.state.sanitize_waiting();
        true
    }

    fn on_input_required(&mut self, request: InputRequest) -> bool {
        if !request.personas.is_empty() {
            self.state.personas = request.personas;
        }
        if !request.themes.is_empty() {
            self.state.themes = request.themes;
        }
        if let Some(plan) = request.research_plan.filter(|v| !v.is_null()) {
            self.state.research_plan = Some(plan);
        }
        if let Some(outline) = request.outline.filter(|v| !v.is_null()) {
            self.state.outline = Some(outline);
        }

        match request.input_type {
            Some(input) => {
                let stage = StepId::for_input(input);
                if stage.index() > self.state.step_index() {
                    self.state.advance_to(stage, StepStatus::InProgress);
                }
                self.state.set_waiting(Some(input));
                if !self.state.status.is_terminal() {
                    self.state.status = ProcessStatus::UserInputRequired;
                }
            }
            None => {
                // No recognizable input type: stage the artifacts but
                // render no prompt.
                self.state.clear_waiting();
            }
        }
        self.state.sanitize_waiting();
        true
    }

    fn on_input_resolved(&mut self, input: Option<InputType>) -> bool {
        self.state.clear_waiting();
        if let Some(input) = input {
            let stage = StepId::for_input(input);
            if stage.index() >= self.state.step_index() {
                self.state.advance_to(stage, StepStatus::Completed);
                if let Some(next) = stage.next() {
                    self.state.advance_to(next, StepStatus::InProgress);
                }
            }
        }
        if !self.state.status.is_terminal() {
            self.state.status = ProcessStatus::Running;
        }
        true
    }

    fn on_content_chunk(&mut self, content: &str) -> bool {
        if content.is_empty() {
            return false;
        }
        self.state.generated_content.push_str(content);
        true
    }

    fn on_section_completed(&mut self, payload: SectionPayload) -> bool {
        let Some(index) = payload.section_index else {
            debug!("ignoring section_completed without an index");
            return false;
        };
        self.state
            .upsert_section(index, payload.title, payload.content);
        self.state.current_section_index = Some(index);
        true
    }

    fn on_generation_completed(
        &mut self,
        final_article: Option<serde_json::Value>,
        article_id: Option<String>,
    ) -> bool {
        self.state.complete_all();
        if let Some(article) = final_article.filter(|v| !v.is_null()) {
            self.state.final_article = Some(article);
        }
        if let Some(id) = article_id.filter(|id| !id.is_empty()) {
            self.state.article_id = Some(id);
        }
        true
    }

    fn on_status_transition(&mut self, status: ProcessStatus) -> bool {
        if self.state.status.is_terminal() {
            debug!(from = %self.state.status, to = %status, "ignoring status transition past terminal");
            return false;
        }
        self.state.status = status;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{Value, json};

    fn event(id: &str, event_type: &str, data: Value) -> ProcessEvent {
        ProcessEvent {
            id: id.to_string(),
            process_id: "p1".to_string(),
            event_type: event_type.to_string(),
            event_data: data,
            event_sequence: None,
            created_at: Utc::now(),
        }
    }

    fn row(updated_at: &str, fields: Value) -> ProcessStateRow {
        let mut body = json!({"id": "p1", "user_id": "u1", "updated_at": updated_at});
        if let (Some(base), Some(extra)) = (body.as_object_mut(), fields.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(body).unwrap()
    }

    fn stamp(secs: i64) -> String {
        Utc.timestamp_opt(1_780_000_000 + secs, 0)
            .unwrap()
            .to_rfc3339()
    }

    #[test]
    fn current_step_never_regresses() {
        let mut rec = Reconciler::new();
        assert!(rec.ingest_row(
            &row(
                &stamp(0),
                json!({"status": "running", "current_step": "research_execution"})
            ),
            SyncOrigin::Fetch,
        ));
        assert_eq!(rec.state().current_step, StepId::Researching);

        // An event for an earlier step is discarded.
        assert!(!rec.ingest_event(&event(
            "e1",
            "step_started",
            json!({"step_name": "persona_generation"})
        )));
        assert_eq!(rec.state().current_step, StepId::Researching);

        // An authoritative row naming an earlier step applies its fields
        // but the step index is clamped.
        assert!(rec.ingest_row(
            &row(
                &stamp(2),
                json!({"status": "user_input_required", "current_step": "persona_generation"})
            ),
            SyncOrigin::RowUpdate,
        ));
        assert_eq!(rec.state().current_step, StepId::Researching);
        assert_eq!(rec.state().status, ProcessStatus::UserInputRequired);
    }

    #[test]
    fn redelivered_event_is_idempotent() {
        let mut rec = Reconciler::new();
        let ev = event(
            "e1",
            "section_completed",
            json!({"section_index": 1, "content": "intro"}),
        );
        assert!(rec.ingest_event(&ev));
        let after_first = rec.state().clone();
        assert!(!rec.ingest_event(&ev));
        assert_eq!(rec.state(), &after_first);
    }

    #[test]
    fn duplicate_step_completed_does_not_double_advance() {
        let mut rec = Reconciler::new();
        let ev = event(
            "e1",
            "step_completed",
            json!({"step_name": "persona_generation"}),
        );
        assert!(rec.ingest_event(&ev));
        assert_eq!(rec.state().current_step, StepId::ThemeGenerating);
        assert_eq!(
            rec.state().step_status(StepId::PersonaGenerating),
            StepStatus::Completed
        );

        // Identical redelivery: suppressed by the recent-key set.
        assert!(!rec.ingest_event(&ev));
        assert_eq!(rec.state().current_step, StepId::ThemeGenerating);

        // Same completion under a fresh id: superseded, still no advance.
        let replay = event(
            "e2",
            "step_completed",
            json!({"step_name": "persona_generation"}),
        );
        assert!(!rec.ingest_event(&replay));
        assert_eq!(rec.state().current_step, StepId::ThemeGenerating);
    }

    #[test]
    fn stale_row_is_rejected() {
        let mut rec = Reconciler::new();
        assert!(rec.ingest_row(
            &row(
                &stamp(100),
                json!({"status": "running", "current_step": "outline_generation"})
            ),
            SyncOrigin::RowUpdate,
        ));
        let before = rec.state().clone();

        // 20s older than the applied stamp: beyond the 10s tolerance.
        assert!(!rec.ingest_row(
            &row(
                &stamp(80),
                json!({"status": "user_input_required", "current_step": "persona_generation"})
            ),
            SyncOrigin::RowUpdate,
        ));
        assert_eq!(rec.state(), &before);
    }

    #[test]
    fn near_simultaneous_rows_within_tolerance_apply() {
        let mut rec = Reconciler::new();
        assert!(rec.ingest_row(
            &row(&stamp(100), json!({"status": "running", "current_step": "researching"})),
            SyncOrigin::RowUpdate,
        ));
        // 5s behind: inside the tolerance window, still applied.
        assert!(rec.ingest_row(
            &row(
                &stamp(95),
                json!({"status": "running", "current_step": "outline_generation"})
            ),
            SyncOrigin::RowUpdate,
        ));
        assert_eq!(rec.state().current_step, StepId::OutlineGenerating);
    }

    #[test]
    fn identical_fingerprint_rows_are_throttled() {
        let mut rec = Reconciler::new();
        assert!(rec.ingest_row(
            &row(&stamp(0), json!({"status": "running", "current_step": "researching"})),
            SyncOrigin::RowUpdate,
        ));
        // Same semantic state a moment later, only the stamp changed.
        assert!(!rec.ingest_row(
            &row(&stamp(1), json!({"status": "running", "current_step": "researching"})),
            SyncOrigin::RowUpdate,
        ));
    }

    #[test]
    fn regressing_state_event_is_discarded_whole() {
        let mut rec = Reconciler::new();
        assert!(rec.ingest_row(
            &row(&stamp(0), json!({"status": "running", "current_step": "researching"})),
            SyncOrigin::Fetch,
        ));
        // Event-sourced snapshot naming an earlier step: dropped with its
        // artifacts.
        assert!(!rec.ingest_event(&event(
            "e1",
            "process_state_updated",
            json!({
                "status": "user_input_required",
                "current_step": "persona_generation",
                "article_context": {"personas": [{"id": 1, "name": "Writer"}]},
            })
        )));
        assert!(rec.state().personas.is_empty());
        assert_eq!(rec.state().status, ProcessStatus::Running);
    }

    #[test]
    fn artifacts_fill_if_absent_across_rows() {
        let mut rec = Reconciler::new();
        assert!(rec.ingest_row(
            &row(
                &stamp(0),
                json!({
                    "status": "user_input_required",
                    "current_step": "outline_generation",
                    "is_waiting_for_input": true,
                    "input_type": "approve_outline",
                    "article_context": {"outline": {"sections": ["intro", "body"]}},
                })
            ),
            SyncOrigin::RowUpdate,
        ));
        assert!(rec.state().outline.is_some());

        // A later sync without the outline leaves it populated.
        assert!(rec.ingest_row(
            &row(
                &stamp(5),
                json!({"status": "running", "current_step": "writing_sections"})
            ),
            SyncOrigin::RowUpdate,
        ));
        assert_eq!(
            rec.state().outline,
            Some(json!({"sections": ["intro", "body"]}))
        );
    }

    #[test]
    fn waiting_state_is_always_valid_for_current_step() {
        let mut rec = Reconciler::new();
        let notifications: Vec<ProcessEvent> = vec![
            event("e1", "generation_started", json!({})),
            event(
                "e2",
                "user_input_required",
                json!({
                    "input_type": "select_persona",
                    "personas": [{"id": 1, "name": "Writer", "description": ""}],
                }),
            ),
            event("e3", "user_input_resolved", json!({"input_type": "select_persona"})),
            event("e4", "step_completed", json!({"step_name": "theme_generation"})),
            event(
                "e5",
                "user_input_required",
                json!({"input_type": "select_theme"}),
            ),
            event("e6", "step_started", json!({"step_name": "research_execution"})),
        ];
        for notification in &notifications {
            rec.ingest_event(notification);
            let state = rec.state();
            if state.is_waiting_for_input {
                let input = state.input_type.expect("waiting requires an input type");
                assert_eq!(
                    state.current_step.valid_input(),
                    Some(input),
                    "input {input} invalid for step {}",
                    state.current_step
                );
            }
        }
    }

    #[test]
    fn milestone_row_holds_step_at_its_stage() {
        let mut rec = Reconciler::new();
        assert!(rec.ingest_row(
            &row(
                &stamp(0),
                json!({
                    "status": "user_input_required",
                    "current_step": "persona_generated",
                    "is_waiting_for_input": true,
                    "input_type": "select_persona",
                    "article_context": {"personas": [{"id": 1, "name": "Writer"}]},
                })
            ),
            SyncOrigin::RowUpdate,
        ));
        assert_eq!(rec.state().current_step, StepId::PersonaGenerating);
        assert!(rec.state().is_waiting_for_input);
        assert_eq!(rec.state().input_type, Some(InputType::SelectPersona));
    }

    #[test]
    fn input_required_then_resolved_advances_one_step() {
        let mut rec = Reconciler::new();
        assert!(rec.ingest_event(&event(
            "e1",
            "user_input_required",
            json!({
                "input_type": "select_persona",
                "personas": [{"id": 1, "name": "Writer"}],
            })
        )));
        assert_eq!(rec.state().current_step, StepId::PersonaGenerating);
        assert!(rec.state().is_waiting_for_input);
        assert_eq!(rec.state().status, ProcessStatus::UserInputRequired);

        assert!(rec.ingest_event(&event(
            "e2",
            "user_input_resolved",
            json!({"input_type": "select_persona"})
        )));
        assert!(!rec.state().is_waiting_for_input);
        assert_eq!(rec.state().current_step, StepId::ThemeGenerating);
        assert_eq!(
            rec.state().step_status(StepId::PersonaGenerating),
            StepStatus::Completed
        );
    }

    #[test]
    fn outline_approval_survives_data_arriving_later() {
        let mut rec = Reconciler::new();
        assert!(rec.ingest_event(&event(
            "e1",
            "user_input_required",
            json!({"input_type": "approve_outline"})
        )));
        assert!(rec.state().is_waiting_for_input);
        assert!(rec.state().outline.is_none());

        // The outline lands in a later row sync.
        assert!(rec.ingest_row(
            &row(
                &stamp(1),
                json!({
                    "status": "user_input_required",
                    "current_step": "outline_generated",
                    "is_waiting_for_input": true,
                    "input_type": "approve_outline",
                    "article_context": {"outline": {"sections": ["intro"]}},
                })
            ),
            SyncOrigin::RowUpdate,
        ));
        assert!(rec.state().is_waiting_for_input);
        assert!(rec.state().outline.is_some());
    }

    #[test]
    fn sections_arriving_out_of_order_aggregate_by_index() {
        let mut rec = Reconciler::new();
        for (id, index, content) in [
            ("e1", 2, "second section"),
            ("e2", 1, "first section"),
            ("e3", 3, "third section"),
        ] {
            assert!(rec.ingest_event(&event(
                id,
                "section_completed",
                json!({"section_index": index, "content": content}),
            )));
        }
        assert_eq!(
            rec.state().generated_content,
            "first section\n\nsecond section\n\nthird section"
        );
    }

    #[test]
    fn empty_sections_are_dropped_from_aggregate() {
        let mut rec = Reconciler::new();
        for (id, index, content) in [("e1", 1, "alpha"), ("e2", 2, ""), ("e3", 3, "omega")] {
            rec.ingest_event(&event(
                id,
                "section_completed",
                json!({"section_index": index, "content": content}),
            ));
        }
        assert_eq!(rec.state().generated_content, "alpha\n\nomega");
    }

    #[test]
    fn rollback_restores_waiting_flags_and_records_error() {
        let mut rec = Reconciler::new();
        rec.ingest_event(&event(
            "e1",
            "user_input_required",
            json!({
                "input_type": "select_persona",
                "personas": [{"id": 1, "name": "Writer"}],
            }),
        ));
        let guard = rec.begin_submission();
        assert!(!rec.state().is_waiting_for_input);

        rec.rollback_submission(guard, "submission failed: 500");
        assert!(rec.state().is_waiting_for_input);
        assert_eq!(rec.state().input_type, Some(InputType::SelectPersona));
        assert_eq!(rec.state().error.as_deref(), Some("submission failed: 500"));
    }

    #[test]
    fn generation_error_marks_current_step() {
        let mut rec = Reconciler::new();
        rec.ingest_event(&event(
            "e1",
            "step_started",
            json!({"step_name": "section_writing"}),
        ));
        assert!(rec.ingest_event(&event(
            "e2",
            "generation_error",
            json!({"error": "model unavailable"})
        )));
        assert_eq!(rec.state().status, ProcessStatus::Error);
        assert_eq!(
            rec.state().step_status(StepId::WritingSections),
            StepStatus::Error
        );
        assert_eq!(rec.state().error.as_deref(), Some("model unavailable"));
    }

    #[test]
    fn completion_marks_all_steps_and_stores_article() {
        let mut rec = Reconciler::new();
        assert!(rec.ingest_event(&event(
            "e1",
            "generation_completed",
            json!({"article_id": "a-9", "final_article": {"title": "Done"}})
        )));
        assert_eq!(rec.state().status, ProcessStatus::Completed);
        assert!(
            rec.state()
                .steps
                .iter()
                .all(|s| s.status == StepStatus::Completed)
        );
        assert_eq!(rec.state().article_id.as_deref(), Some("a-9"));
        assert!(rec.state().final_article.is_some());
    }

    #[test]
    fn cancel_clears_waiting_and_is_sticky() {
        let mut rec = Reconciler::new();
        rec.ingest_event(&event(
            "e1",
            "user_input_required",
            json!({
                "input_type": "select_persona",
                "personas": [{"id": 1, "name": "Writer"}],
            }),
        ));
        assert!(rec.ingest_event(&event("e2", "generation_cancelled", json!({}))));
        assert_eq!(rec.state().status, ProcessStatus::Cancelled);
        assert!(!rec.state().is_waiting_for_input);

        // Terminal status does not yield to event-sourced transitions.
        assert!(!rec.ingest_event(&event("e3", "generation_paused", json!({}))));
        assert_eq!(rec.state().status, ProcessStatus::Cancelled);
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let mut rec = Reconciler::new();
        rec.ingest_event(&event(
            "e1",
            "step_completed",
            json!({"step_name": "keyword_analysis"}),
        ));
        assert_ne!(rec.state(), &GenerationState::new());
        rec.reset();
        assert_eq!(rec.state(), &GenerationState::new());

        // Events seen before the reset are ingestable again.
        assert!(rec.ingest_event(&event(
            "e1",
            "step_completed",
            json!({"step_name": "keyword_analysis"}),
        )));
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let mut rec = Reconciler::new();
        let before = rec.state().clone();
        assert!(!rec.ingest_event(&event("e1", "billing_updated", json!({"plan": "pro"}))));
        assert_eq!(rec.state(), &before);
    }

    #[test]
    fn content_chunks_append_until_sections_take_over() {
        let mut rec = Reconciler::new();
        assert!(rec.ingest_event(&event("e1", "content_chunk", json!({"content": "Writing"}))));
        assert!(rec.ingest_event(&event("e2", "content_chunk", json!({"content": " intro..."}))));
        assert_eq!(rec.state().generated_content, "Writing intro...");

        assert!(rec.ingest_event(&event(
            "e3",
            "section_completed",
            json!({"section_index": 1, "content": "Intro, final text."})
        )));
        assert_eq!(rec.state().generated_content, "Intro, final text.");
    }
}
