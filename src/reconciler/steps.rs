//! The fixed pipeline step vocabulary and the backend-name mapping.
//!
//! The backend reports steps under several historical names; everything
//! here maps onto one authoritative ordered list of eight steps. Milestone
//! names (`persona_generated`, `outline_proposed`, ...) mark a
//! user-decision checkpoint inside their stage and map to that stage
//! rather than to the step after it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::models::InputType;

/// UI-facing pipeline steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    KeywordAnalyzing,
    PersonaGenerating,
    ThemeGenerating,
    ResearchPlanning,
    Researching,
    OutlineGenerating,
    WritingSections,
    Editing,
}

/// All steps in execution order.
pub const STEP_ORDER: [StepId; 8] = [
    StepId::KeywordAnalyzing,
    StepId::PersonaGenerating,
    StepId::ThemeGenerating,
    StepId::ResearchPlanning,
    StepId::Researching,
    StepId::OutlineGenerating,
    StepId::WritingSections,
    StepId::Editing,
];

impl StepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeywordAnalyzing => "keyword_analyzing",
            Self::PersonaGenerating => "persona_generating",
            Self::ThemeGenerating => "theme_generating",
            Self::ResearchPlanning => "research_planning",
            Self::Researching => "researching",
            Self::OutlineGenerating => "outline_generating",
            Self::WritingSections => "writing_sections",
            Self::Editing => "editing",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::KeywordAnalyzing => "Keyword analysis",
            Self::PersonaGenerating => "Persona generation",
            Self::ThemeGenerating => "Theme generation",
            Self::ResearchPlanning => "Research planning",
            Self::Researching => "Research execution",
            Self::OutlineGenerating => "Outline generation",
            Self::WritingSections => "Section writing",
            Self::Editing => "Final editing",
        }
    }

    /// Position in [`STEP_ORDER`]. Monotonicity is enforced on this index.
    pub fn index(&self) -> usize {
        STEP_ORDER.iter().position(|s| s == self).unwrap_or(0)
    }

    pub fn from_index(index: usize) -> Option<StepId> {
        STEP_ORDER.get(index).copied()
    }

    /// The step the pipeline advances into after this one completes.
    pub fn next(&self) -> Option<StepId> {
        Self::from_index(self.index() + 1)
    }

    /// The user decision this step can wait on, if any. Steps returning
    /// `None` are non-interactive: waiting flags are cleared on them
    /// unconditionally.
    pub fn valid_input(&self) -> Option<InputType> {
        match self {
            Self::PersonaGenerating => Some(InputType::SelectPersona),
            Self::ThemeGenerating => Some(InputType::SelectTheme),
            Self::ResearchPlanning => Some(InputType::ApprovePlan),
            Self::OutlineGenerating => Some(InputType::ApproveOutline),
            _ => None,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.valid_input().is_some()
    }

    /// The step a given user decision belongs to.
    pub fn for_input(input: InputType) -> StepId {
        match input {
            InputType::SelectPersona => Self::PersonaGenerating,
            InputType::SelectTheme => Self::ThemeGenerating,
            InputType::ApprovePlan => Self::ResearchPlanning,
            InputType::ApproveOutline => Self::OutlineGenerating,
        }
    }

    /// Map a backend step name onto the fixed vocabulary. Returns `None`
    /// for names that are not steps (terminal markers, unknown values).
    pub fn from_backend(name: &str) -> Option<StepId> {
        let step = match name {
            "keyword_analyzing" | "keyword_analysis" | "analyzing_keywords" => {
                Self::KeywordAnalyzing
            }
            "persona_generating" | "persona_generation" | "generating_personas"
            | "persona_generated" | "personas_generated" => Self::PersonaGenerating,
            "theme_generating" | "theme_generation" | "theme_proposal" | "generating_themes"
            | "theme_generated" | "themes_generated" | "theme_proposed" => Self::ThemeGenerating,
            "research_planning" | "research_plan" | "planning_research"
            | "research_plan_generated" => Self::ResearchPlanning,
            "researching" | "research" | "research_execution" | "executing_research" => {
                Self::Researching
            }
            "outline_generating" | "outline_generation" | "generating_outline"
            | "outline_generated" | "outline_proposed" => Self::OutlineGenerating,
            "writing_sections" | "section_writing" | "sections_writing" | "writing" => {
                Self::WritingSections
            }
            "editing" | "final_edit" | "final_editing" | "finalizing" => Self::Editing,
            _ => return None,
        };
        Some(step)
    }

    /// Whether a backend name is a user-decision milestone (artifact
    /// produced, pipeline holding for input) as opposed to a stage name.
    pub fn is_milestone(name: &str) -> bool {
        matches!(
            name,
            "persona_generated"
                | "personas_generated"
                | "theme_generated"
                | "themes_generated"
                | "theme_proposed"
                | "research_plan_generated"
                | "outline_generated"
                | "outline_proposed"
        )
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single step in the progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Terminal step statuses are sticky and never downgraded.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
