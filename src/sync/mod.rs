//! Entry point for field-level callers: generate a value, persist it, and nudge
//! the watcher so observers see it without waiting for the next poll.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::generation::{
    Correlator, FallbackValues, GenerationTransport, HttpTransport, JobRequest, PromptTemplates,
};
use crate::store::{Document, ElementKey, FieldRecord, RecordStore, ValidationReport};
use crate::watcher::{ChangeCallback, ChangeWatcher, WatchSnapshot};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// One field to (re)generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub element_id: String,
    pub field_name: String,
    pub field_type: String,
    #[serde(default)]
    pub current_value: Option<String>,
    #[serde(default)]
    pub prompt_context: Option<String>,
}

impl GenerationRequest {
    pub fn new(
        element_id: impl Into<String>,
        field_name: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Self {
        Self {
            element_id: element_id.into(),
            field_name: field_name.into(),
            field_type: field_type.into(),
            current_value: None,
            prompt_context: None,
        }
    }

    pub fn with_current_value(mut self, value: impl Into<String>) -> Self {
        self.current_value = Some(value.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.prompt_context = Some(context.into());
        self
    }
}

pub struct SyncFacade {
    store: Arc<RecordStore>,
    correlator: Correlator,
    watcher: ChangeWatcher,
    prompts: PromptTemplates,
    fallbacks: FallbackValues,
    business_description: String,
    scope_request_ids: bool,
}

impl SyncFacade {
    pub fn new(
        config: &SyncConfig,
        transport: Arc<dyn GenerationTransport>,
        on_change: ChangeCallback,
    ) -> Self {
        let store = Arc::new(
            RecordStore::new(config.data_path.clone())
                .with_backup_policy(config.backup_keep, config.cleanup_probability()),
        );
        let correlator = Correlator::new(transport).with_request_timeout(config.request_timeout);
        let watcher = ChangeWatcher::new(Arc::clone(&store), config.watch, on_change);

        Self {
            store,
            correlator,
            watcher,
            prompts: PromptTemplates::default(),
            fallbacks: FallbackValues::default(),
            business_description: config.business_description.clone(),
            scope_request_ids: config.scope_request_ids,
        }
    }

    /// Facade over the HTTP transport described by `config`.
    pub fn from_config(config: &SyncConfig, on_change: ChangeCallback) -> Result<Self> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::new(config, Arc::new(transport), on_change))
    }

    pub fn with_prompts(mut self, prompts: PromptTemplates) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: FallbackValues) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn watcher(&self) -> &ChangeWatcher {
        &self.watcher
    }

    /// Id the job is submitted under. Per-field unless scoping is disabled or
    /// the element id already names this field.
    pub fn request_id_for(&self, request: &GenerationRequest) -> String {
        if self.scope_request_ids
            && !ElementKey::is_scoped_to(&request.element_id, &request.field_name)
        {
            ElementKey::scoped(&request.element_id, &request.field_name)
        } else {
            request.element_id.clone()
        }
    }

    /// Generates one field and stores the outcome.
    ///
    /// Generation failures never surface here: the field's fallback (or a
    /// `Generated <field>` placeholder) is stored instead. Errors are limited to
    /// invalid requests, a second request for a field already in flight, and
    /// store failures.
    ///
    /// With `scope_request_ids` on (the default) the job id is
    /// `<element>_custom_<field>` and only results echoing that id resolve the
    /// call. A service that answers with the bare element id needs
    /// `scope_request_ids: false`, otherwise every call ends in a timeout and
    /// its fallback.
    pub async fn request_generation(&self, request: GenerationRequest) -> Result<FieldRecord> {
        if request.element_id.trim().is_empty() || request.field_name.trim().is_empty() {
            return Err(SyncError::Configuration(
                "element id and field name must not be empty".into(),
            ));
        }

        let prompt = self.prompts.build(
            &request.field_type,
            request.current_value.as_deref(),
            request.prompt_context.as_deref(),
        );
        let job = JobRequest {
            request_id: self.request_id_for(&request),
            field_name: request.field_name.clone(),
            business_context: self.business_description.clone(),
            prompt,
        };

        let value = match self.correlator.submit(job).await {
            Ok(output) => output,
            // The in-flight request will store its own result.
            Err(err @ SyncError::DuplicateRequest(_)) => return Err(err),
            Err(err) => {
                let fallback = self.fallbacks.resolve(&request.field_name);
                warn!(
                    "generation for {}.{} failed ({err}); storing fallback {fallback:?}",
                    request.element_id, request.field_name
                );
                fallback
            }
        };

        let record = FieldRecord::generated(value, request.field_type.clone());
        let stored = record.clone();
        self.with_store(move |store| {
            store.upsert(&request.element_id, &request.field_name, stored)
        })
        .await??;

        self.watcher.trigger_immediate_check().await;
        Ok(record)
    }

    /// Runs every request concurrently; results come back in input order.
    pub async fn request_generations(
        &self,
        requests: Vec<GenerationRequest>,
    ) -> Vec<Result<FieldRecord>> {
        join_all(
            requests
                .into_iter()
                .map(|request| self.request_generation(request)),
        )
        .await
    }

    /// Sends a probe job through the correlator and reports whether an answer
    /// came back.
    pub async fn check_connection(&self) -> bool {
        let job = JobRequest {
            request_id: format!("connection-test-{}", Utc::now().timestamp_millis()),
            field_name: "test".into(),
            business_context: self.business_description.clone(),
            prompt: "Reply with the single word OK.".into(),
        };
        let timeout = self.correlator.request_timeout().min(PROBE_TIMEOUT);

        match self.correlator.submit_with_timeout(job, timeout).await {
            Ok(_) => {
                info!("generation service answered the connection probe");
                true
            }
            Err(err) => {
                warn!("connection probe failed: {err}");
                false
            }
        }
    }

    pub async fn start_watching(&self) -> anyhow::Result<()> {
        self.watcher.start().await
    }

    pub async fn stop_watching(&self) -> anyhow::Result<()> {
        self.watcher.stop().await
    }

    pub async fn trigger_immediate_check(&self) {
        self.watcher.trigger_immediate_check().await
    }

    pub async fn watch_snapshot(&self) -> WatchSnapshot {
        self.watcher.snapshot().await
    }

    pub async fn read_document(&self) -> Result<Document> {
        self.with_store(|store| store.read()).await
    }

    pub async fn validate_store(&self) -> Result<ValidationReport> {
        self.with_store(|store| store.validate_and_repair()).await
    }

    pub async fn cleanup_backups(&self, keep: usize) -> Result<usize> {
        self.with_store(move |store| store.cleanup_backups(keep)).await?
    }

    /// Runs blocking store I/O off the async workers.
    async fn with_store<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RecordStore) -> T + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || work(&store))
            .await
            .map_err(|err| SyncError::store_io(self.store.path(), format!("store worker failed: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchConfig;
    use crate::generation::{ScriptedTransport, SubmitOutcome};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::time::{sleep, Instant};

    fn config(dir: &TempDir, scope_request_ids: bool) -> SyncConfig {
        SyncConfig {
            data_path: dir.path().join("content.json"),
            request_timeout: Duration::from_secs(2),
            scope_request_ids,
            watch: WatchConfig {
                idle_interval: Duration::from_secs(60),
                active_interval: Duration::from_secs(60),
                quiet_period: Duration::from_secs(60),
            },
            ..SyncConfig::default()
        }
    }

    fn quiet_callback() -> ChangeCallback {
        Arc::new(|_: &Document| {})
    }

    fn echo_transport() -> Arc<ScriptedTransport> {
        Arc::new(ScriptedTransport::responding(|job| {
            Some(format!("{} for {}", job.field_name, job.request_id))
        }))
    }

    #[tokio::test]
    async fn rejected_submission_stores_the_fallback() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_submit_outcome(SubmitOutcome::Fail(SyncError::Submission(
            "HTTP 500".into(),
        )));
        let facade = SyncFacade::new(&config(&dir, true), transport, quiet_callback());

        let record = facade
            .request_generation(GenerationRequest::new("hero", "title", "title"))
            .await
            .unwrap();
        assert_eq!(record.value, "Your Amazing Title Here");
        assert!(record.generated);

        let stored = facade.read_document().await.unwrap();
        assert_eq!(stored.get("hero", "title"), Some(&record));
    }

    #[tokio::test]
    async fn unknown_field_falls_back_to_placeholder() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::unconfigured());
        let facade = SyncFacade::new(&config(&dir, true), transport, quiet_callback());

        let record = facade
            .request_generation(GenerationRequest::new("hero", "tagline", "text"))
            .await
            .unwrap();
        assert_eq!(record.value, "Generated tagline");
    }

    #[tokio::test]
    async fn job_carries_scoped_id_prompt_and_business_context() {
        let dir = TempDir::new().unwrap();
        let transport = echo_transport();
        let facade = SyncFacade::new(&config(&dir, true), transport.clone(), quiet_callback());

        let request = GenerationRequest::new("hero", "title", "title")
            .with_current_value("Old title")
            .with_context("bakery");
        let record = facade.request_generation(request).await.unwrap();
        assert_eq!(record.value, "title for hero_custom_title");
        assert_eq!(record.field_type, "title");

        let job = &transport.submitted()[0];
        assert_eq!(job.request_id, "hero_custom_title");
        assert_eq!(job.business_context, "Modern web application");
        assert!(job.prompt.contains("Current value: \"Old title\""));
        assert!(job.prompt.ends_with("Context: bakery"));

        // Stored under the caller's element id, not the request id.
        let stored = facade.read_document().await.unwrap();
        assert!(stored.get("hero", "title").is_some());
    }

    #[test]
    fn request_id_scoping_rules() {
        let dir = TempDir::new().unwrap();
        let scoped = SyncFacade::new(&config(&dir, true), echo_transport(), quiet_callback());
        let legacy = SyncFacade::new(&config(&dir, false), echo_transport(), quiet_callback());

        let plain = GenerationRequest::new("E1", "title", "title");
        let pre_scoped = GenerationRequest::new("E1_custom_title", "title", "title");
        assert_eq!(scoped.request_id_for(&plain), "E1_custom_title");
        assert_eq!(scoped.request_id_for(&pre_scoped), "E1_custom_title");
        assert_eq!(legacy.request_id_for(&plain), "E1");
    }

    #[tokio::test]
    async fn concurrent_fields_of_one_element_do_not_cross() {
        let dir = TempDir::new().unwrap();
        let facade = SyncFacade::new(&config(&dir, true), echo_transport(), quiet_callback());

        let results = facade
            .request_generations(vec![
                GenerationRequest::new("hero", "title", "title"),
                GenerationRequest::new("hero", "description", "description"),
            ])
            .await;

        assert_eq!(results[0].as_ref().unwrap().value, "title for hero_custom_title");
        assert_eq!(
            results[1].as_ref().unwrap().value,
            "description for hero_custom_description"
        );
        let stored = facade.read_document().await.unwrap();
        assert_eq!(stored.record_count(), 2);
    }

    #[tokio::test]
    async fn duplicate_request_does_not_overwrite_with_fallback() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let facade = Arc::new(SyncFacade::new(
            &config(&dir, true),
            transport.clone(),
            quiet_callback(),
        ));

        let first = tokio::spawn({
            let facade = Arc::clone(&facade);
            async move {
                facade
                    .request_generation(GenerationRequest::new("hero", "title", "title"))
                    .await
            }
        });
        let deadline = Instant::now() + Duration::from_secs(2);
        while facade.correlator().pending_count() == 0 {
            assert!(Instant::now() < deadline);
            sleep(Duration::from_millis(5)).await;
        }

        let second = facade
            .request_generation(GenerationRequest::new("hero", "title", "title"))
            .await;
        assert!(matches!(second, Err(SyncError::DuplicateRequest(_))));
        assert!(facade.read_document().await.unwrap().is_empty());

        transport.push_result("hero_custom_title", "Acme");
        assert_eq!(first.await.unwrap().unwrap().value, "Acme");
    }

    #[tokio::test]
    async fn empty_identifiers_are_rejected() {
        let dir = TempDir::new().unwrap();
        let facade = SyncFacade::new(&config(&dir, true), echo_transport(), quiet_callback());
        assert!(matches!(
            facade
                .request_generation(GenerationRequest::new("", "title", "title"))
                .await,
            Err(SyncError::Configuration(_))
        ));
        assert!(facade.read_document().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn generation_wakes_the_watcher() {
        let dir = TempDir::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);
        let on_change: ChangeCallback = Arc::new(move |doc: &Document| {
            if let Some(record) = doc.get("hero", "title") {
                sink.lock().unwrap().push(record.value.clone());
            }
        });
        let facade = SyncFacade::new(&config(&dir, true), echo_transport(), on_change);

        facade.start_watching().await.unwrap();
        facade
            .request_generation(GenerationRequest::new("hero", "title", "title"))
            .await
            .unwrap();

        // Intervals are a minute long, so only the trigger can explain this.
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().is_empty() {
            assert!(Instant::now() < deadline, "watcher never saw the new value");
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(seen.lock().unwrap()[0], "title for hero_custom_title");
        facade.stop_watching().await.unwrap();
    }

    #[tokio::test]
    async fn connection_probe_reports_reachability() {
        let dir = TempDir::new().unwrap();
        let up = SyncFacade::new(&config(&dir, true), echo_transport(), quiet_callback());
        assert!(up.check_connection().await);

        let down_transport = Arc::new(ScriptedTransport::new());
        down_transport.set_submit_outcome(SubmitOutcome::Fail(SyncError::Submission(
            "cannot connect".into(),
        )));
        let down = SyncFacade::new(&config(&dir, true), down_transport, quiet_callback());
        assert!(!down.check_connection().await);
    }
}
