//! Per-process generation engine.
//!
//! Wires a [`ChannelManager`] to a [`Reconciler`]: a pump task ingests
//! every notice through the reconciler and publishes snapshots over a
//! `watch` channel. Consumers render from the watched state and call the
//! bound actions; they never mutate state directly.
//!
//! Actions are pessimistic about progress: a submission only clears the
//! waiting flag (a provisional spinner), and the authoritative step
//! transition arrives via the next event or sync. On HTTP failure the
//! waiting state is rolled back and the error surfaces on the state.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::client::GenerationApi;
use crate::api::models::{GenerationRequest, InputType, StartResponse};
use crate::errors::ActionError;
use crate::realtime::manager::{ChannelManager, ConnectionState, Notice};
use crate::realtime::transport::RealtimeTransport;
use crate::reconciler::{GenerationState, Reconciler, SyncOrigin};

/// Facade owning one process's realtime channel and state machine.
/// Constructed per active process; dropped on process switch.
pub struct GenerationEngine {
    manager: ChannelManager,
    api: Arc<dyn GenerationApi>,
    reconciler: Arc<Mutex<Reconciler>>,
    state: watch::Sender<GenerationState>,
    process_id: String,
    pump: JoinHandle<()>,
}

impl GenerationEngine {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        api: Arc<dyn GenerationApi>,
        process_id: impl Into<String>,
        user_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let process_id = process_id.into();
        let (manager, notices) = ChannelManager::spawn(
            transport,
            api.clone(),
            Some(process_id.clone()),
            Some(user_id.into()),
            token.into(),
        );

        let reconciler = Arc::new(Mutex::new(Reconciler::new()));
        let (state_tx, _) = watch::channel(GenerationState::new());
        let pump = tokio::spawn(pump_notices(
            notices,
            reconciler.clone(),
            state_tx.clone(),
        ));

        Self {
            manager,
            api,
            reconciler,
            state: state_tx,
            process_id,
            pump,
        }
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Watch the reconciled generation state.
    pub fn state(&self) -> watch::Receiver<GenerationState> {
        self.state.subscribe()
    }

    /// Watch connection transitions.
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.manager.connection()
    }

    pub async fn connect(&self) {
        self.manager.connect().await;
    }

    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
    }

    /// One manual full-state read, reconciled like any other sync.
    pub async fn refresh(&self) -> bool {
        self.manager.fetch_process_data().await.is_some()
    }

    // ── User-decision actions ────────────────────────────────────────

    pub async fn select_persona(&self, persona_id: i64) -> Result<(), ActionError> {
        self.submit_user_input(InputType::SelectPersona, json!({ "persona_id": persona_id }))
            .await
    }

    pub async fn select_theme(&self, theme_id: i64) -> Result<(), ActionError> {
        self.submit_user_input(InputType::SelectTheme, json!({ "theme_id": theme_id }))
            .await
    }

    pub async fn approve_plan(&self) -> Result<(), ActionError> {
        self.submit_user_input(InputType::ApprovePlan, json!({ "approved": true }))
            .await
    }

    pub async fn approve_outline(&self) -> Result<(), ActionError> {
        self.submit_user_input(InputType::ApproveOutline, json!({ "approved": true }))
            .await
    }

    /// Submit a user decision. Rejected immediately when disconnected:
    /// decision actions carry semantic step transitions and are never
    /// silently queued.
    pub async fn submit_user_input(
        &self,
        input: InputType,
        payload: Value,
    ) -> Result<(), ActionError> {
        if !self.manager.is_connected() {
            return Err(ActionError::NotConnected);
        }

        let guard = {
            let mut reconciler = self.reconciler.lock().await;
            let guard = reconciler.begin_submission();
            let _ = self.state.send(reconciler.state().clone());
            guard
        };

        match self
            .api
            .submit_user_input(&self.process_id, input, payload)
            .await
        {
            Ok(()) => {
                debug!(input = %input, "user input submitted; awaiting backend confirmation");
                Ok(())
            }
            Err(source) => {
                let mut reconciler = self.reconciler.lock().await;
                reconciler.rollback_submission(guard, source.to_string());
                let _ = self.state.send(reconciler.state().clone());
                Err(ActionError::SubmitFailed {
                    input_type: input.as_str().to_string(),
                    source,
                })
            }
        }
    }

    // ── Pipeline control (queued while disconnected) ─────────────────

    pub async fn pause(&self) {
        self.control("pause", |api, id| {
            Box::pin(async move { api.pause(&id).await.map(drop).map_err(Into::into) })
        })
        .await;
    }

    pub async fn resume(&self) {
        self.control("resume", |api, id| {
            Box::pin(async move { api.resume(&id).await.map(drop).map_err(Into::into) })
        })
        .await;
    }

    pub async fn cancel(&self) {
        self.control("cancel", |api, id| {
            Box::pin(async move { api.cancel(&id).await.map(drop).map_err(Into::into) })
        })
        .await;
    }

    async fn control<F>(&self, name: &str, call: F)
    where
        F: Fn(
                Arc<dyn GenerationApi>,
                String,
            ) -> futures::future::BoxFuture<'static, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        let api = self.api.clone();
        let process_id = self.process_id.clone();
        self.manager
            .queue_action(
                name,
                Arc::new(move || call(api.clone(), process_id.clone())),
            )
            .await;
    }

    /// Start a new generation and reset the local state machine to the
    /// initial step. The returned process id is what to watch next.
    pub async fn start(&self, request: &GenerationRequest) -> Result<StartResponse, ActionError> {
        let response = self.api.start_generation(request).await?;
        let mut reconciler = self.reconciler.lock().await;
        reconciler.reset();
        let _ = self.state.send(reconciler.state().clone());
        info!(process_id = %response.process_id, "generation started; state reset");
        Ok(response)
    }
}

impl Drop for GenerationEngine {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Ingest every notice through the single reconciliation path and
/// publish snapshots when the state changes.
async fn pump_notices(
    mut notices: tokio::sync::mpsc::Receiver<Notice>,
    reconciler: Arc<Mutex<Reconciler>>,
    state: watch::Sender<GenerationState>,
) {
    while let Some(notice) = notices.recv().await {
        match notice {
            Notice::Event(event) => {
                let mut reconciler = reconciler.lock().await;
                if reconciler.ingest_event(&event) {
                    let _ = state.send(reconciler.state().clone());
                }
            }
            Notice::RowSync { row, fetched } => {
                let origin = if fetched {
                    SyncOrigin::Fetch
                } else {
                    SyncOrigin::RowUpdate
                };
                let mut reconciler = reconciler.lock().await;
                if reconciler.ingest_row(&row, origin) {
                    let _ = state.send(reconciler.state().clone());
                }
            }
            // Connection errors live on the connection watch; the
            // generation state keeps its last known good value.
            Notice::ConnectionError(message) => {
                debug!(%message, "connection error notice");
            }
        }
    }
    debug!("notice pump stopping");
}
