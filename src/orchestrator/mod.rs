// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Pipeline orchestrator
//!
//! Walks a validated pipeline graph level by level: stages within one level
//! run concurrently, levels run strictly in order. A stage executes only
//! when every upstream stage succeeded; a failed upstream skips the whole
//! downstream cone without invoking its collaborator. Every transition is
//! appended to the run record and persisted as it happens, so partial
//! progress is observable even when the run later fails. Failed stages are
//! never retried; provisioning and publishing have side effects that must
//! be re-triggered deliberately.

mod locks;

pub use locks::EnvironmentLocks;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::collaborators::{ApplyRequest, Collaborators, PublishRequest};
use crate::errors::ShipflowError;
use crate::pipeline::{
    Action, ArtifactReference, BootstrapPolicy, Pipeline, PipelineGraph, Stage, ValueSource,
};
use crate::run::{RunRecord, RunStatus, RunStore, StageOutcome, Trigger};

/// What a successful stage hands to its dependents
#[derive(Debug, Default)]
struct StageOutput {
    /// Named outputs (provisioner outputs such as registry_uri)
    outputs: BTreeMap<String, String>,

    /// At most one artifact reference per stage
    artifact: Option<ArtifactReference>,

    /// Human-readable note for the run record
    detail: Option<String>,
}

/// Everything one stage execution needs, scoped to that call
struct StageExecution {
    stage: Stage,
    environment: String,
    bootstrap: BootstrapPolicy,
    revision: String,
    working_dir: PathBuf,
    upstream_outputs: BTreeMap<String, String>,
    upstream_artifacts: BTreeMap<String, ArtifactReference>,
    collaborators: Collaborators,
    locks: Arc<EnvironmentLocks>,
    store: Arc<RunStore>,
}

/// Drives pipeline runs to completion
pub struct Orchestrator {
    collaborators: Collaborators,
    store: Arc<RunStore>,
    locks: Arc<EnvironmentLocks>,
    cancel: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, store: Arc<RunStore>) -> Self {
        // Sender dropped: the flag stays false and the run is never cancelled
        let (_tx, cancel) = watch::channel(false);

        Self {
            collaborators,
            store,
            locks: Arc::new(EnvironmentLocks::new()),
            cancel,
        }
    }

    /// Share provisioning locks with other orchestrators in this process
    pub fn with_locks(mut self, locks: Arc<EnvironmentLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Observe a cancellation flag; once true, in-flight stages finish but
    /// no new stage starts
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute a pipeline for one trigger event, returning the sealed run
    /// record. Graph construction errors abort before any record exists.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        working_dir: &Path,
        trigger: Trigger,
    ) -> Result<RunRecord, ShipflowError> {
        let graph = PipelineGraph::build(pipeline)?;

        let mut record =
            RunRecord::begin(&pipeline.name, &pipeline.environment, trigger.clone());
        self.store.save(&record).await?;

        tracing::info!(
            run = %record.id,
            pipeline = %pipeline.name,
            revision = %trigger.revision,
            bootstrap = %pipeline.bootstrap,
            "run started"
        );

        let mut outcomes: HashMap<String, StageOutcome> = HashMap::new();
        let mut stage_outputs: HashMap<String, BTreeMap<String, String>> = HashMap::new();
        let mut stage_artifacts: HashMap<String, ArtifactReference> = HashMap::new();
        let mut cancelled = false;

        for level in graph.levels() {
            if *self.cancel.borrow() {
                cancelled = true;
            }

            if cancelled {
                for idx in level {
                    let stage = &pipeline.stages[idx];
                    outcomes.insert(stage.name.clone(), StageOutcome::Skipped);
                    record.record(&stage.name, StageOutcome::Skipped, Some("cancelled".into()));
                    self.store.save(&record).await?;
                }
                continue;
            }

            let mut join: JoinSet<(usize, Result<StageOutput, ShipflowError>)> = JoinSet::new();
            let mut spawned: Vec<usize> = Vec::new();

            for idx in level {
                let stage = &pipeline.stages[idx];

                // Skip-propagation: any upstream not succeeded skips this
                // stage without invoking its collaborator
                let blocked = graph
                    .dependencies(&stage.name)
                    .unwrap_or_default()
                    .into_iter()
                    .find(|dep| outcomes.get(dep) != Some(&StageOutcome::Succeeded));

                if let Some(dep) = blocked {
                    outcomes.insert(stage.name.clone(), StageOutcome::Skipped);
                    record.record(
                        &stage.name,
                        StageOutcome::Skipped,
                        Some(format!("upstream '{}' did not succeed", dep)),
                    );
                    self.store.save(&record).await?;
                    continue;
                }

                // A stage only ever observes outputs and artifacts of stages
                // that already reached succeeded
                let mut upstream_outputs = BTreeMap::new();
                let mut upstream_artifacts = BTreeMap::new();
                for upstream in &pipeline.stages {
                    if !graph.depends_transitively(&stage.name, &upstream.name) {
                        continue;
                    }
                    if let Some(outputs) = stage_outputs.get(&upstream.name) {
                        upstream_outputs.extend(outputs.clone());
                    }
                    if let Some(artifact) = stage_artifacts.get(&upstream.name) {
                        upstream_artifacts.insert(upstream.name.clone(), artifact.clone());
                    }
                }

                record.record(&stage.name, StageOutcome::Running, None);
                self.store.save(&record).await?;

                let execution = StageExecution {
                    stage: stage.clone(),
                    environment: pipeline.environment.clone(),
                    bootstrap: pipeline.bootstrap.clone(),
                    revision: trigger.revision.clone(),
                    working_dir: working_dir.to_path_buf(),
                    upstream_outputs,
                    upstream_artifacts,
                    collaborators: self.collaborators.clone(),
                    locks: self.locks.clone(),
                    store: self.store.clone(),
                };

                spawned.push(idx);
                join.spawn(async move { (idx, execute_stage(execution).await) });
            }

            while let Some(joined) = join.join_next().await {
                let (idx, result) = match joined {
                    Ok(pair) => pair,
                    Err(e) => {
                        // A panicked stage task fails the run, not the process
                        tracing::error!(error = %e, "stage task panicked");
                        continue;
                    }
                };
                let stage = &pipeline.stages[idx];

                match result {
                    Ok(output) => {
                        outcomes.insert(stage.name.clone(), StageOutcome::Succeeded);
                        if let Some(artifact) = output.artifact {
                            stage_artifacts.insert(stage.name.clone(), artifact.clone());
                            record.record_artifact(&stage.name, artifact);
                        }
                        stage_outputs.insert(stage.name.clone(), output.outputs);
                        record.record(&stage.name, StageOutcome::Succeeded, output.detail);
                        tracing::info!(stage = %stage.name, "stage succeeded");
                    }
                    Err(e) => {
                        outcomes.insert(stage.name.clone(), StageOutcome::Failed);
                        record.record(&stage.name, StageOutcome::Failed, Some(e.detail()));
                        tracing::error!(stage = %stage.name, error = %e, "stage failed");
                    }
                }
                self.store.save(&record).await?;
            }

            // A panicked task produced no result; its stage still has to
            // reach a terminal outcome so the run cannot seal succeeded
            for idx in spawned {
                let stage = &pipeline.stages[idx];
                if !outcomes.contains_key(&stage.name) {
                    outcomes.insert(stage.name.clone(), StageOutcome::Failed);
                    record.record(
                        &stage.name,
                        StageOutcome::Failed,
                        Some("stage task panicked".into()),
                    );
                    self.store.save(&record).await?;
                }
            }
        }

        let status = if cancelled {
            RunStatus::Cancelled
        } else if outcomes
            .values()
            .any(|o| matches!(o, StageOutcome::Failed | StageOutcome::Skipped))
        {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        record.seal(status);
        self.store.save(&record).await?;

        tracing::info!(run = %record.id, status = %status, "run sealed");

        Ok(record)
    }
}

/// Resolve a literal-or-from_output value against upstream outputs
fn resolve_value(
    source: &ValueSource,
    upstream_outputs: &BTreeMap<String, String>,
    stage_name: &str,
) -> Result<String, ShipflowError> {
    match source {
        ValueSource::Literal(value) => Ok(value.clone()),
        ValueSource::FromOutput { from_output } => upstream_outputs
            .get(from_output)
            .cloned()
            .ok_or_else(|| ShipflowError::MissingOutput {
                stage: stage_name.to_string(),
                key: from_output.clone(),
            }),
    }
}

/// The newest artifact among the upstream stages
fn newest_upstream_artifact(
    upstream_artifacts: &BTreeMap<String, ArtifactReference>,
) -> Option<&ArtifactReference> {
    upstream_artifacts.values().max_by_key(|a| a.published_at)
}

/// Dispatch one stage to its collaborator
async fn execute_stage(execution: StageExecution) -> Result<StageOutput, ShipflowError> {
    let stage = &execution.stage;

    match &stage.action {
        Action::Test { command, shell } => {
            let report = execution
                .collaborators
                .test_runner
                .run(command, shell, &execution.working_dir, &stage.env)
                .await?;

            if !report.passed {
                return Err(ShipflowError::TestFailure {
                    stage: stage.name.clone(),
                    log: report.log,
                });
            }

            Ok(StageOutput::default())
        }

        Action::Provision { dir, scope: _, targets } => {
            let mut variables = BTreeMap::new();

            if stage.provisions_service() {
                let image = service_image(&execution).await?;
                variables.insert("image".to_string(), image);
            }

            let request = ApplyRequest {
                environment: execution.environment.clone(),
                dir: execution.working_dir.join(dir),
                targets: targets.clone(),
                variables,
                env: stage.env.clone(),
            };

            // One apply at a time per environment, across concurrent runs
            let _guard = execution.locks.acquire(&execution.environment).await;
            let outcome = execution.collaborators.provisioner.apply(&request).await?;

            Ok(StageOutput {
                outputs: outcome.outputs,
                artifact: None,
                detail: (!outcome.changed).then(|| "no changes".to_string()),
            })
        }

        Action::Publish {
            context,
            dockerfile,
            destination,
            artifact_name,
        } => {
            let destination =
                resolve_value(destination, &execution.upstream_outputs, &stage.name)?;

            let request = PublishRequest {
                name: artifact_name.clone().unwrap_or_else(|| stage.name.clone()),
                context: execution.working_dir.join(context),
                dockerfile: dockerfile.as_ref().map(|d| execution.working_dir.join(d)),
                destination,
                tag: execution.revision.clone(),
                env: stage.env.clone(),
            };

            let artifact = execution
                .collaborators
                .publisher
                .build_and_publish(&request)
                .await?;

            Ok(StageOutput {
                outputs: BTreeMap::new(),
                detail: Some(format!("published {}", artifact.image_ref())),
                artifact: Some(artifact),
            })
        }

        Action::UpdateService { service, artifact_from } => {
            let service_id = resolve_value(service, &execution.upstream_outputs, &stage.name)?;

            let artifact = match artifact_from {
                Some(from) => execution.upstream_artifacts.get(from),
                None => newest_upstream_artifact(&execution.upstream_artifacts),
            }
            .ok_or_else(|| ShipflowError::UpdateError {
                service: service_id.clone(),
                detail: "no published artifact available from upstream stages".to_string(),
            })?
            .clone();

            execution
                .collaborators
                .service_updater
                .update_service(&service_id, &artifact)
                .await?;

            Ok(StageOutput {
                outputs: BTreeMap::new(),
                artifact: None,
                detail: Some(format!("service now runs {}", artifact.image_ref())),
            })
        }
    }
}

/// Which image a service-provisioning stage should declare.
///
/// Preference order: an artifact published earlier in this run, then the
/// most recent artifact from past runs, then — under the placeholder policy
/// only — the placeholder image. The reorder policy guarantees an upstream
/// artifact exists (enforced at graph construction), so reaching the
/// fallback there is a hard error.
async fn service_image(execution: &StageExecution) -> Result<String, ShipflowError> {
    if let Some(artifact) = newest_upstream_artifact(&execution.upstream_artifacts) {
        return Ok(artifact.image_ref());
    }

    if let Some(artifact) = execution.store.latest_artifact(&execution.environment).await? {
        return Ok(artifact.image_ref());
    }

    match &execution.bootstrap {
        BootstrapPolicy::Placeholder { image } => {
            tracing::info!(
                stage = %execution.stage.name,
                image = %image,
                "first creation, provisioning service with placeholder image"
            );
            Ok(image.clone())
        }
        BootstrapPolicy::Reorder => Err(ShipflowError::ProvisionError {
            detail: format!(
                "stage '{}' needs a published artifact but none exists",
                execution.stage.name
            ),
            help: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        ApplyOutcome, ImagePublisher, Provisioner, ServiceUpdater, TestReport, TestRunner,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    struct MockProvisioner {
        outputs: BTreeMap<String, String>,
        fail: bool,
        applies: StdMutex<Vec<ApplyRequest>>,
        in_flight: AtomicBool,
        overlap: Arc<AtomicBool>,
    }

    impl MockProvisioner {
        fn with_outputs(pairs: &[(&str, &str)]) -> Self {
            Self {
                outputs: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                fail: false,
                applies: StdMutex::new(Vec::new()),
                in_flight: AtomicBool::new(false),
                overlap: Arc::new(AtomicBool::new(false)),
            }
        }

        fn failing() -> Self {
            let mut p = Self::with_outputs(&[]);
            p.fail = true;
            p
        }

        fn apply_count(&self) -> usize {
            self.applies.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Provisioner for MockProvisioner {
        async fn apply(&self, request: &ApplyRequest) -> Result<ApplyOutcome, ShipflowError> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlap.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.store(false, Ordering::SeqCst);

            self.applies.lock().unwrap().push(request.clone());

            if self.fail {
                return Err(ShipflowError::ProvisionError {
                    detail: "apply refused".into(),
                    help: None,
                });
            }

            Ok(ApplyOutcome {
                outputs: self.outputs.clone(),
                changed: true,
            })
        }

        async fn plan(&self, _request: &ApplyRequest) -> Result<String, ShipflowError> {
            Ok("no changes".into())
        }

        async fn check_available(&self) -> Result<bool, ShipflowError> {
            Ok(true)
        }
    }

    struct MockPublisher {
        fail: bool,
        requests: StdMutex<Vec<PublishRequest>>,
    }

    impl MockPublisher {
        fn new() -> Self {
            Self {
                fail: false,
                requests: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ImagePublisher for MockPublisher {
        async fn build_and_publish(
            &self,
            request: &PublishRequest,
        ) -> Result<ArtifactReference, ShipflowError> {
            self.requests.lock().unwrap().push(request.clone());

            if self.fail {
                return Err(ShipflowError::PublishError {
                    detail: "push refused".into(),
                });
            }

            Ok(ArtifactReference::published(
                &request.name,
                &request.destination,
                &request.tag,
            ))
        }

        async fn check_available(&self) -> Result<bool, ShipflowError> {
            Ok(true)
        }
    }

    struct MockTestRunner {
        pass: bool,
        cancel_on_run: StdMutex<Option<watch::Sender<bool>>>,
    }

    impl MockTestRunner {
        fn passing() -> Self {
            Self {
                pass: true,
                cancel_on_run: StdMutex::new(None),
            }
        }

        fn failing() -> Self {
            Self {
                pass: false,
                cancel_on_run: StdMutex::new(None),
            }
        }
    }

    #[async_trait]
    impl TestRunner for MockTestRunner {
        async fn run(
            &self,
            _command: &str,
            _shell: &str,
            _dir: &Path,
            _env: &HashMap<String, String>,
        ) -> Result<TestReport, ShipflowError> {
            if let Some(tx) = self.cancel_on_run.lock().unwrap().take() {
                let _ = tx.send(true);
            }

            Ok(TestReport {
                passed: self.pass,
                log: if self.pass { "ok".into() } else { "1 test failed".into() },
            })
        }
    }

    struct MockUpdater {
        updates: StdMutex<Vec<(String, ArtifactReference)>>,
    }

    impl MockUpdater {
        fn new() -> Self {
            Self {
                updates: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ServiceUpdater for MockUpdater {
        async fn update_service(
            &self,
            service_id: &str,
            artifact: &ArtifactReference,
        ) -> Result<(), ShipflowError> {
            self.updates
                .lock()
                .unwrap()
                .push((service_id.to_string(), artifact.clone()));
            Ok(())
        }
    }

    struct PanickingUpdater;

    #[async_trait]
    impl ServiceUpdater for PanickingUpdater {
        async fn update_service(
            &self,
            _service_id: &str,
            _artifact: &ArtifactReference,
        ) -> Result<(), ShipflowError> {
            panic!("updater crashed");
        }
    }

    struct Harness {
        provisioner: Arc<MockProvisioner>,
        publisher: Arc<MockPublisher>,
        updater: Arc<MockUpdater>,
        store: Arc<RunStore>,
        orchestrator: Orchestrator,
        _temp: TempDir,
    }

    fn harness(provisioner: MockProvisioner, test_runner: MockTestRunner) -> Harness {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(RunStore::new(temp.path().to_path_buf()).unwrap());
        let provisioner = Arc::new(provisioner);
        let publisher = Arc::new(MockPublisher::new());
        let updater = Arc::new(MockUpdater::new());

        let collaborators = Collaborators {
            provisioner: provisioner.clone(),
            publisher: publisher.clone(),
            test_runner: Arc::new(test_runner),
            service_updater: updater.clone(),
        };

        Harness {
            provisioner,
            publisher,
            updater,
            store: store.clone(),
            orchestrator: Orchestrator::new(collaborators, store),
            _temp: temp,
        }
    }

    /// test -> provision (registry) -> publish consuming registry_uri
    fn three_stage_pipeline() -> Pipeline {
        Pipeline::from_yaml(
            r#"
version: "1"
name: "deploy"
environment: "dev"
stages:
  - name: "test"
    action:
      type: test
      command: "make test"
  - name: "provision"
    action:
      type: provision
      dir: infra/
      scope: registry
    depends_on:
      - test
  - name: "publish"
    action:
      type: publish
      context: app/
      destination:
        from_output: registry_uri
    depends_on:
      - provision
"#,
        )
        .unwrap()
    }

    fn placeholder_pipeline() -> Pipeline {
        Pipeline::from_yaml(
            r#"
version: "1"
name: "deploy"
environment: "prod"
stages:
  - name: "provision"
    action:
      type: provision
      dir: infra/
  - name: "publish"
    action:
      type: publish
      context: app/
      destination:
        from_output: registry_uri
    depends_on:
      - provision
  - name: "deploy"
    action:
      type: update_service
      service:
        from_output: service_id
    depends_on:
      - publish
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_failed_test_skips_whole_downstream_cone() {
        // Scenario A
        let h = harness(
            MockProvisioner::with_outputs(&[("registry_uri", "registry.example/app")]),
            MockTestRunner::failing(),
        );

        let record = h
            .orchestrator
            .execute(&three_stage_pipeline(), Path::new("."), Trigger::revision("rev123"))
            .await
            .unwrap();

        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.outcome_of("test"), StageOutcome::Failed);
        assert_eq!(record.outcome_of("provision"), StageOutcome::Skipped);
        assert_eq!(record.outcome_of("publish"), StageOutcome::Skipped);
        assert_eq!(h.provisioner.apply_count(), 0);
        assert!(h.publisher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_successful_run_flows_registry_uri_into_publish() {
        // Scenario B
        let h = harness(
            MockProvisioner::with_outputs(&[("registry_uri", "registry.example/app")]),
            MockTestRunner::passing(),
        );

        let record = h
            .orchestrator
            .execute(&three_stage_pipeline(), Path::new("."), Trigger::revision("rev123"))
            .await
            .unwrap();

        assert_eq!(record.status, RunStatus::Succeeded);

        let artifact = &record.artifacts["publish"];
        assert_eq!(artifact.tag, "rev123");
        assert_eq!(artifact.repository, "registry.example/app");

        let requests = h.publisher.requests.lock().unwrap();
        assert_eq!(requests[0].destination, "registry.example/app");

        let last = h.store.last_artifact("publish").await.unwrap().unwrap();
        assert_eq!(last.tag, "rev123");
    }

    #[tokio::test]
    async fn test_dependencies_succeed_before_dependents_start() {
        let h = harness(
            MockProvisioner::with_outputs(&[("registry_uri", "registry.example/app")]),
            MockTestRunner::passing(),
        );

        let record = h
            .orchestrator
            .execute(&three_stage_pipeline(), Path::new("."), Trigger::revision("rev1"))
            .await
            .unwrap();

        let position = |stage: &str, outcome: StageOutcome| {
            record
                .transitions
                .iter()
                .position(|t| t.stage == stage && t.outcome == outcome)
                .unwrap()
        };

        assert!(position("test", StageOutcome::Succeeded) < position("provision", StageOutcome::Running));
        assert!(position("provision", StageOutcome::Succeeded) < position("publish", StageOutcome::Running));
    }

    #[tokio::test]
    async fn test_placeholder_bootstrap_from_scratch() {
        let h = harness(
            MockProvisioner::with_outputs(&[
                ("registry_uri", "registry.example/app"),
                ("service_id", "svc-1"),
            ]),
            MockTestRunner::passing(),
        );

        let record = h
            .orchestrator
            .execute(&placeholder_pipeline(), Path::new("."), Trigger::revision("rev123"))
            .await
            .unwrap();

        assert_eq!(record.status, RunStatus::Succeeded);

        // First creation provisions against the placeholder image
        let applies = h.provisioner.applies.lock().unwrap();
        assert_eq!(applies[0].variables["image"], "registry.k8s.io/pause:3.9");

        // The service ends on the freshly published artifact, not the placeholder
        let updates = h.updater.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "svc-1");
        assert_eq!(updates[0].1.tag, "rev123");
        assert_eq!(updates[0].1.image_ref(), "registry.example/app:rev123");
    }

    #[tokio::test]
    async fn test_second_run_provisions_with_last_published_artifact() {
        let h = harness(
            MockProvisioner::with_outputs(&[
                ("registry_uri", "registry.example/app"),
                ("service_id", "svc-1"),
            ]),
            MockTestRunner::passing(),
        );

        let pipeline = placeholder_pipeline();
        h.orchestrator
            .execute(&pipeline, Path::new("."), Trigger::revision("rev1"))
            .await
            .unwrap();
        h.orchestrator
            .execute(&pipeline, Path::new("."), Trigger::revision("rev2"))
            .await
            .unwrap();

        let applies = h.provisioner.applies.lock().unwrap();
        assert_eq!(applies.len(), 2);
        // Second run already has a published artifact to declare
        assert_eq!(applies[1].variables["image"], "registry.example/app:rev1");
    }

    #[tokio::test]
    async fn test_provision_failure_is_not_retried() {
        let h = harness(MockProvisioner::failing(), MockTestRunner::passing());

        let record = h
            .orchestrator
            .execute(&three_stage_pipeline(), Path::new("."), Trigger::revision("rev1"))
            .await
            .unwrap();

        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.outcome_of("provision"), StageOutcome::Failed);
        assert_eq!(record.outcome_of("publish"), StageOutcome::Skipped);
        assert_eq!(h.provisioner.apply_count(), 1);

        let failure = record
            .transitions
            .iter()
            .find(|t| t.stage == "provision" && t.outcome == StageOutcome::Failed)
            .unwrap();
        assert!(failure.detail.as_ref().unwrap().contains("apply refused"));
    }

    #[tokio::test]
    async fn test_cancellation_skips_unstarted_stages() {
        let (tx, rx) = watch::channel(false);

        let test_runner = MockTestRunner::passing();
        *test_runner.cancel_on_run.lock().unwrap() = Some(tx);

        let temp = TempDir::new().unwrap();
        let store = Arc::new(RunStore::new(temp.path().to_path_buf()).unwrap());
        let collaborators = Collaborators {
            provisioner: Arc::new(MockProvisioner::with_outputs(&[])),
            publisher: Arc::new(MockPublisher::new()),
            test_runner: Arc::new(test_runner),
            service_updater: Arc::new(MockUpdater::new()),
        };

        let orchestrator =
            Orchestrator::new(collaborators, store).with_cancellation(rx);

        let record = orchestrator
            .execute(&three_stage_pipeline(), Path::new("."), Trigger::revision("rev1"))
            .await
            .unwrap();

        // The in-flight test stage ran to completion; nothing after it started
        assert_eq!(record.status, RunStatus::Cancelled);
        assert_eq!(record.outcome_of("test"), StageOutcome::Succeeded);
        assert_eq!(record.outcome_of("provision"), StageOutcome::Skipped);
        assert_eq!(record.outcome_of("publish"), StageOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_panicked_stage_task_is_recorded_failed() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(RunStore::new(temp.path().to_path_buf()).unwrap());
        let collaborators = Collaborators {
            provisioner: Arc::new(MockProvisioner::with_outputs(&[
                ("registry_uri", "registry.example/app"),
                ("service_id", "svc-1"),
            ])),
            publisher: Arc::new(MockPublisher::new()),
            test_runner: Arc::new(MockTestRunner::passing()),
            service_updater: Arc::new(PanickingUpdater),
        };
        let orchestrator = Orchestrator::new(collaborators, store);

        let record = orchestrator
            .execute(&placeholder_pipeline(), Path::new("."), Trigger::revision("rev1"))
            .await
            .unwrap();

        // A crashed leaf stage must not leave the run sealed succeeded
        assert_eq!(record.outcome_of("deploy"), StageOutcome::Failed);
        assert_eq!(record.status, RunStatus::Failed);

        let failure = record
            .transitions
            .iter()
            .find(|t| t.stage == "deploy" && t.outcome == StageOutcome::Failed)
            .unwrap();
        assert!(failure.detail.as_ref().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_provisioning_serialized_across_concurrent_runs() {
        let h = harness(
            MockProvisioner::with_outputs(&[("registry_uri", "registry.example/app")]),
            MockTestRunner::passing(),
        );
        let overlap = h.provisioner.overlap.clone();

        let pipeline = three_stage_pipeline();
        let (a, b) = tokio::join!(
            h.orchestrator
                .execute(&pipeline, Path::new("."), Trigger::revision("rev1")),
            h.orchestrator
                .execute(&pipeline, Path::new("."), Trigger::revision("rev2")),
        );

        assert_eq!(a.unwrap().status, RunStatus::Succeeded);
        assert_eq!(b.unwrap().status, RunStatus::Succeeded);
        assert_eq!(h.provisioner.apply_count(), 2);
        assert!(!overlap.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_output_fails_publish_stage() {
        // Provisioner exposes no registry_uri output
        let h = harness(MockProvisioner::with_outputs(&[]), MockTestRunner::passing());

        let record = h
            .orchestrator
            .execute(&three_stage_pipeline(), Path::new("."), Trigger::revision("rev1"))
            .await
            .unwrap();

        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.outcome_of("publish"), StageOutcome::Failed);

        let failure = record
            .transitions
            .iter()
            .find(|t| t.stage == "publish" && t.outcome == StageOutcome::Failed)
            .unwrap();
        assert!(failure.detail.as_ref().unwrap().contains("registry_uri"));
    }
}
