//! Backend API surface — wire shapes and the HTTP client.
//!
//! | Module   | Responsibility                                            |
//! |----------|-----------------------------------------------------------|
//! | `models` | Wire types: `ProcessEvent`, `ProcessStateRow`, statuses  |
//! | `client` | `GenerationApi` trait + bearer-authenticated `ApiClient`  |

pub mod client;
pub mod models;

pub use client::{ApiClient, GenerationApi};
pub use models::{
    ArticleContext, GenerationRequest, InputRequest, InputType, Persona, PipelineEvent,
    ProcessEvent, ProcessStateRow, ProcessStatus, SectionPayload, StartResponse, StateSnapshot,
    Theme,
};
