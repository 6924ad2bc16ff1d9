//! Upgrade engine implementation.

use std::time::Instant;

use tracing::{debug, error, info};

use crate::config::UpgradeConfig;
use crate::descriptor::{Direction, MigrationDescriptor, MigrationKind};
use crate::error::{MigrateResult, MigrationError};
use crate::executor::{ConnectionManager, NoopConnectionManager, ScriptExecutor};
use crate::journal::{AppliedRecord, Journal};
use crate::plan::{ExecutionPlanner, LATEST_VERSION, MigrationPlan, StepFilter};
use crate::provider::{DescriptorProvider, ScriptProvider};
use crate::result::{DatabaseUpgradeResult, ExecutedScript};
use crate::script::SqlScript;

/// Builder for creating an upgrade engine.
pub struct UpgradeEngineBuilder {
    config: UpgradeConfig,
    journal: Box<dyn Journal>,
    executor: Box<dyn ScriptExecutor>,
    connection_manager: Box<dyn ConnectionManager>,
    descriptor_providers: Vec<Box<dyn DescriptorProvider>>,
    script_providers: Vec<Box<dyn ScriptProvider>>,
}

impl UpgradeEngineBuilder {
    /// Create a new builder.
    pub fn new(
        journal: impl Journal + 'static,
        executor: impl ScriptExecutor + 'static,
    ) -> Self {
        Self {
            config: UpgradeConfig::default(),
            journal: Box::new(journal),
            executor: Box::new(executor),
            connection_manager: Box::new(NoopConnectionManager),
            descriptor_providers: Vec::new(),
            script_providers: Vec::new(),
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: UpgradeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the connection manager providing the operation scope.
    pub fn connection_manager(mut self, manager: impl ConnectionManager + 'static) -> Self {
        self.connection_manager = Box::new(manager);
        self
    }

    /// Add a source of migration descriptors.
    pub fn with_descriptors(mut self, provider: impl DescriptorProvider + 'static) -> Self {
        self.descriptor_providers.push(Box::new(provider));
        self
    }

    /// Add a source of flat scripts.
    pub fn with_scripts(mut self, provider: impl ScriptProvider + 'static) -> Self {
        self.script_providers.push(Box::new(provider));
        self
    }

    /// Build the engine.
    pub fn build(self) -> UpgradeEngine {
        UpgradeEngine {
            config: self.config,
            journal: self.journal,
            executor: self.executor,
            connection_manager: self.connection_manager,
            descriptor_providers: self.descriptor_providers,
            script_providers: self.script_providers,
        }
    }
}

/// Tracks progress of one run so a failure can report what already happened.
struct Run {
    start: Instant,
    executed: Vec<ExecutedScript>,
    current: Option<String>,
}

impl Run {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            executed: Vec::new(),
            current: None,
        }
    }

    fn finish(self, outcome: MigrateResult<()>, operation: &str) -> DatabaseUpgradeResult {
        let duration_ms = self.start.elapsed().as_millis() as i64;
        match outcome {
            Ok(()) => DatabaseUpgradeResult::success(self.executed, duration_ms),
            Err(e) => {
                error!(
                    script = self.current.as_deref().unwrap_or("<none>"),
                    error = %e,
                    recoverable = e.is_recoverable(),
                    "{} failed",
                    operation
                );
                DatabaseUpgradeResult::failure(self.executed, self.current, e, duration_ms)
            }
        }
    }
}

/// Orchestrates planning, execution and journaling of migrations.
pub struct UpgradeEngine {
    config: UpgradeConfig,
    journal: Box<dyn Journal>,
    executor: Box<dyn ScriptExecutor>,
    connection_manager: Box<dyn ConnectionManager>,
    descriptor_providers: Vec<Box<dyn DescriptorProvider>>,
    script_providers: Vec<Box<dyn ScriptProvider>>,
}

impl UpgradeEngine {
    /// Start building an engine.
    pub fn builder(
        journal: impl Journal + 'static,
        executor: impl ScriptExecutor + 'static,
    ) -> UpgradeEngineBuilder {
        UpgradeEngineBuilder::new(journal, executor)
    }

    /// Get the configuration.
    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    /// Check that the store is reachable.
    pub async fn try_connect(&self) -> MigrateResult<()> {
        self.connection_manager.try_connect().await
    }

    /// Whether any migration or flat script is waiting to be applied.
    pub async fn is_upgrade_required(&self) -> MigrateResult<bool> {
        let _scope = self.connection_manager.operation_starting().await?;

        let applied = self.journal.get_applied().await?;
        let descriptors = self.load_descriptors().await?;
        let forward = self
            .planner(&descriptors)
            .forward(&applied, LATEST_VERSION, StepFilter::All)?;
        if !forward.is_empty() {
            return Ok(true);
        }

        Ok(!self.pending_scripts(&applied).await?.is_empty())
    }

    /// Plan a migration without performing it.
    pub async fn get_migrations_to_execute(
        &self,
        target: i64,
        filter: StepFilter,
    ) -> MigrateResult<MigrationPlan> {
        let _scope = self.connection_manager.operation_starting().await?;
        self.plan_inside_operation(target, filter).await
    }

    /// Flat scripts that `perform_upgrade` would execute.
    pub async fn get_scripts_to_execute(&self) -> MigrateResult<Vec<SqlScript>> {
        let _scope = self.connection_manager.operation_starting().await?;
        let applied = self.journal.get_applied().await?;
        self.pending_scripts(&applied).await
    }

    /// Everything recorded in the journal.
    pub async fn get_migrated_versions(&self) -> MigrateResult<Vec<AppliedRecord>> {
        let _scope = self.connection_manager.operation_starting().await?;
        self.journal.get_applied().await
    }

    /// Migrate to the configured target version and step.
    pub async fn migrate(&self) -> DatabaseUpgradeResult {
        self.perform_migration(self.config.resolved_target(), self.config.step)
            .await
    }

    /// Bring the store to `target`, applying pending migrations then rolling
    /// back applied schema migrations above it.
    ///
    /// Stops at the first failure. Steps recorded before the failure stay
    /// recorded; re-invoking resumes from there.
    pub async fn perform_migration(&self, target: i64, filter: StepFilter) -> DatabaseUpgradeResult {
        let mut run = Run::new();
        let outcome = self.run_migration(&mut run, target, filter).await;
        run.finish(outcome, "Migration")
    }

    async fn run_migration(
        &self,
        run: &mut Run,
        target: i64,
        filter: StepFilter,
    ) -> MigrateResult<()> {
        if target < 0 {
            return Err(MigrationError::planning(format!(
                "target version must not be negative, got {}",
                target
            )));
        }

        let _scope = self.connection_manager.operation_starting().await?;
        info!(target_version = target, step = %filter, "Beginning database migration");

        let plan = self.plan_inside_operation(target, filter).await?;
        if plan.is_empty() {
            info!("No new migrations need to be executed - completing");
            return Ok(());
        }
        debug!(plan = %plan.summary(), "Migration plan computed");

        self.executor.verify_schema().await?;

        for step in plan.steps() {
            run.current = Some(step.name().to_string());

            if let Some(dependency) = step.required_schema_version() {
                if !self
                    .journal
                    .has_applied(dependency, MigrationKind::Schema)
                    .await?
                {
                    return Err(MigrationError::DependencyUnsatisfied {
                        migration: step.name().to_string(),
                        dependency,
                    });
                }
            }

            let script = SqlScript::new(step.name(), step.script());
            self.executor
                .execute(&script, &self.config.variables)
                .await?;
            self.journal
                .record_applied(&step.descriptor, step.direction)
                .await?;

            info!(
                migration = %step.name(),
                version = step.descriptor.version(),
                direction = %step.direction,
                "Migration applied"
            );
            run.executed.push(ExecutedScript::from(step));
        }

        run.current = None;
        info!("Migration successful");
        Ok(())
    }

    /// Execute every flat script not yet journaled, in provider order.
    pub async fn perform_upgrade(&self) -> DatabaseUpgradeResult {
        let mut run = Run::new();
        let outcome = self.run_upgrade(&mut run).await;
        run.finish(outcome, "Upgrade")
    }

    async fn run_upgrade(&self, run: &mut Run) -> MigrateResult<()> {
        let _scope = self.connection_manager.operation_starting().await?;
        info!("Beginning database upgrade");

        let applied = self.journal.get_applied().await?;
        let scripts = self.pending_scripts(&applied).await?;
        if scripts.is_empty() {
            info!("No new scripts need to be executed - completing");
            return Ok(());
        }

        self.executor.verify_schema().await?;

        for script in &scripts {
            run.current = Some(script.name.clone());

            self.executor
                .execute(script, &self.config.variables)
                .await?;
            self.journal.record_legacy_script(&script.name).await?;

            info!(script = %script.name, "Script executed");
            run.executed.push(ExecutedScript::from(script));
        }

        run.current = None;
        info!("Upgrade successful");
        Ok(())
    }

    /// Journal pending migrations without executing them.
    ///
    /// With `up_to`, stops after recording that migration; the name must be
    /// part of the pending forward plan.
    pub async fn mark_as_executed(&self, up_to: Option<&str>) -> DatabaseUpgradeResult {
        let mut run = Run::new();
        let outcome = self.run_mark_migrations(&mut run, up_to).await;
        run.finish(outcome, "Marking")
    }

    async fn run_mark_migrations(&self, run: &mut Run, up_to: Option<&str>) -> MigrateResult<()> {
        let _scope = self.connection_manager.operation_starting().await?;

        let applied = self.journal.get_applied().await?;
        let descriptors = self.load_descriptors().await?;
        let forward = self
            .planner(&descriptors)
            .forward(&applied, LATEST_VERSION, StepFilter::All)?;

        if let Some(name) = up_to {
            if !forward.iter().any(|s| s.name() == name) {
                return Err(MigrationError::planning(format!(
                    "migration '{}' is not pending",
                    name
                )));
            }
        }

        for step in &forward {
            run.current = Some(step.name().to_string());
            self.journal
                .record_applied(&step.descriptor, Direction::Up)
                .await?;

            info!(migration = %step.name(), "Marking migration as executed");
            run.executed.push(ExecutedScript::from(step));

            if up_to == Some(step.name()) {
                break;
            }
        }

        run.current = None;
        info!("Migration marking successful");
        Ok(())
    }

    /// Journal pending flat scripts without executing them.
    pub async fn mark_scripts_as_executed(&self, up_to: Option<&str>) -> DatabaseUpgradeResult {
        let mut run = Run::new();
        let outcome = self.run_mark_scripts(&mut run, up_to).await;
        run.finish(outcome, "Marking")
    }

    async fn run_mark_scripts(&self, run: &mut Run, up_to: Option<&str>) -> MigrateResult<()> {
        let _scope = self.connection_manager.operation_starting().await?;

        let applied = self.journal.get_applied().await?;
        let scripts = self.pending_scripts(&applied).await?;

        if let Some(name) = up_to {
            if !scripts.iter().any(|s| s.name == name) {
                return Err(MigrationError::planning(format!(
                    "script '{}' is not pending",
                    name
                )));
            }
        }

        for script in &scripts {
            run.current = Some(script.name.clone());
            self.journal.record_legacy_script(&script.name).await?;

            info!(script = %script.name, "Marking script as executed");
            run.executed.push(ExecutedScript::from(script));

            if up_to == Some(script.name.as_str()) {
                break;
            }
        }

        run.current = None;
        info!("Script marking successful");
        Ok(())
    }

    fn planner<'a>(&self, descriptors: &'a [MigrationDescriptor]) -> ExecutionPlanner<'a> {
        ExecutionPlanner::new(descriptors).sort_mode(self.config.sort_mode)
    }

    async fn plan_inside_operation(
        &self,
        target: i64,
        filter: StepFilter,
    ) -> MigrateResult<MigrationPlan> {
        let applied = self.journal.get_applied().await?;
        let descriptors = self.load_descriptors().await?;
        self.planner(&descriptors).plan(&applied, target, filter)
    }

    async fn load_descriptors(&self) -> MigrateResult<Vec<MigrationDescriptor>> {
        let mut descriptors = Vec::new();
        for provider in &self.descriptor_providers {
            descriptors.extend(provider.descriptors().await?);
        }
        Ok(descriptors)
    }

    async fn pending_scripts(&self, applied: &[AppliedRecord]) -> MigrateResult<Vec<SqlScript>> {
        let mut scripts = Vec::new();
        for provider in &self.script_providers {
            scripts.extend(provider.scripts().await?);
        }

        Ok(scripts
            .into_iter()
            .filter(|s| applied.iter().all(|r| r.name != s.name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::descriptor::ExecutionStep;
    use crate::error::ErrorCategory;
    use crate::executor::OperationScope;
    use crate::journal::InMemoryJournal;
    use crate::provider::{StaticDescriptorProvider, StaticScriptProvider};
    use crate::script::ScriptVariables;

    #[derive(Clone, Default)]
    struct RecordingExecutor {
        calls: Arc<Mutex<Vec<(String, String)>>>,
        verify_calls: Arc<AtomicUsize>,
        fail_on: Option<String>,
        fail_verify: bool,
    }

    impl RecordingExecutor {
        fn failing_on(name: &str) -> Self {
            Self {
                fail_on: Some(name.to_string()),
                ..Default::default()
            }
        }

        fn names(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(n, _)| n.clone()).collect()
        }

        fn texts(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(_, t)| t.clone()).collect()
        }
    }

    #[async_trait::async_trait]
    impl ScriptExecutor for RecordingExecutor {
        async fn verify_schema(&self) -> MigrateResult<()> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_verify {
                return Err(MigrationError::connection("store is read-only"));
            }
            Ok(())
        }

        async fn execute(
            &self,
            script: &SqlScript,
            variables: &ScriptVariables,
        ) -> MigrateResult<()> {
            if self.fail_on.as_deref() == Some(script.name.as_str()) {
                return Err(MigrationError::execution(&script.name, "syntax error"));
            }
            let text = script.render(variables)?;
            self.calls.lock().push((script.name.clone(), text));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct CountingConnectionManager {
        opened: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ConnectionManager for CountingConnectionManager {
        async fn operation_starting(&self) -> MigrateResult<OperationScope> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let released = Arc::clone(&self.released);
            Ok(OperationScope::new("counting", move || {
                released.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }

    const SCHEMA_V: i64 = 20160609100800;
    const DATA_V: i64 = 20160609100700;

    fn schema(version: i64, name: &str) -> MigrationDescriptor {
        MigrationDescriptor::schema(
            version,
            name,
            format!("UP {}", name),
            format!("DOWN {}", name),
        )
    }

    fn engine(
        journal: &InMemoryJournal,
        executor: &RecordingExecutor,
        descriptors: Vec<MigrationDescriptor>,
    ) -> UpgradeEngine {
        UpgradeEngine::builder(journal.clone(), executor.clone())
            .with_descriptors(StaticDescriptorProvider::new(descriptors))
            .build()
    }

    #[tokio::test]
    async fn test_empty_plan_is_noop() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        let engine = engine(&journal, &executor, Vec::new());

        let result = engine.perform_migration(LATEST_VERSION, StepFilter::All).await;

        assert!(result.successful);
        assert!(result.executed.is_empty());
        assert_eq!(executor.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        let engine = engine(
            &journal,
            &executor,
            vec![schema(1, "s1"), MigrationDescriptor::data(2, "d2", "INSERT")],
        );

        let first = engine.perform_migration(LATEST_VERSION, StepFilter::All).await;
        assert!(first.successful);
        assert_eq!(first.executed_names(), vec!["s1", "d2"]);
        let after_first = journal.names();

        let second = engine.perform_migration(LATEST_VERSION, StepFilter::All).await;
        assert!(second.successful);
        assert!(second.executed.is_empty());
        assert_eq!(journal.names(), after_first);
        assert_eq!(executor.names(), vec!["s1", "d2"]);
    }

    #[tokio::test]
    async fn test_schema_runs_before_dependent_data() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        let engine = engine(
            &journal,
            &executor,
            vec![
                MigrationDescriptor::data(DATA_V, "beforecode_data", "UPDATE").depends_on(SCHEMA_V),
                schema(SCHEMA_V, "beforecode_schema"),
            ],
        );

        let result = engine.perform_migration(LATEST_VERSION, StepFilter::All).await;

        assert!(result.successful);
        assert_eq!(executor.names(), vec!["beforecode_schema", "beforecode_data"]);
        assert!(journal.has_applied(SCHEMA_V, MigrationKind::Schema).await.unwrap());
    }

    #[tokio::test]
    async fn test_dependency_unsatisfied_stops_batch() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        // The schema migration is above the target, so it never runs.
        let engine = engine(
            &journal,
            &executor,
            vec![
                schema(1, "s1"),
                MigrationDescriptor::data(DATA_V, "beforecode_data", "UPDATE").depends_on(SCHEMA_V),
                schema(SCHEMA_V, "beforecode_schema"),
            ],
        );

        let result = engine.perform_migration(DATA_V, StepFilter::All).await;

        assert!(!result.successful);
        assert_eq!(result.executed_names(), vec!["s1"]);
        assert_eq!(result.failed_script(), Some("beforecode_data"));
        assert_eq!(
            result.cause().map(MigrationError::category),
            Some(ErrorCategory::DependencyUnsatisfied)
        );
        assert_eq!(executor.names(), vec!["s1"]);
        assert_eq!(journal.names(), vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_rollback_uses_down_text_in_descending_order() {
        let descriptors = vec![schema(1, "s1"), schema(2, "s2"), schema(3, "s3")];
        let journal = InMemoryJournal::with_applied(&descriptors).unwrap();
        let executor = RecordingExecutor::default();
        let engine = engine(&journal, &executor, descriptors);

        let result = engine.perform_migration(1, StepFilter::All).await;

        assert!(result.successful);
        assert_eq!(result.executed_names(), vec!["s3", "s2"]);
        assert!(result.executed.iter().all(|s| s.direction == Direction::Down));
        assert_eq!(executor.texts(), vec!["DOWN s3", "DOWN s2"]);
        assert_eq!(journal.names(), vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_forward_then_rollback() {
        let descriptors = vec![schema(1, "s1"), schema(3, "s3")];
        let journal = InMemoryJournal::with_applied(&descriptors[1..]).unwrap();
        let executor = RecordingExecutor::default();
        let engine = engine(&journal, &executor, descriptors);

        let result = engine.perform_migration(2, StepFilter::All).await;

        assert!(result.successful);
        assert_eq!(executor.texts(), vec!["UP s1", "DOWN s3"]);
        assert_eq!(journal.names(), vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_execution_failure_keeps_prior_steps() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::failing_on("s2");
        let engine = engine(&journal, &executor, vec![schema(1, "s1"), schema(2, "s2"), schema(3, "s3")]);

        let result = engine.perform_migration(LATEST_VERSION, StepFilter::All).await;

        assert!(!result.successful);
        assert_eq!(result.executed_names(), vec!["s1"]);
        assert_eq!(result.failed_script(), Some("s2"));
        assert_eq!(
            result.cause().map(MigrationError::category),
            Some(ErrorCategory::Execution)
        );
        assert_eq!(journal.names(), vec!["s1".to_string()]);

        // Resuming with a working executor picks up where the batch stopped.
        let fixed = RecordingExecutor::default();
        let engine = UpgradeEngine::builder(journal.clone(), fixed.clone())
            .with_descriptors(StaticDescriptorProvider::new(vec![
                schema(1, "s1"),
                schema(2, "s2"),
                schema(3, "s3"),
            ]))
            .build();
        let resumed = engine.perform_migration(LATEST_VERSION, StepFilter::All).await;
        assert!(resumed.successful);
        assert_eq!(fixed.names(), vec!["s2", "s3"]);
    }

    /// Journal whose writes fail for one migration name.
    struct FlakyJournal {
        inner: InMemoryJournal,
        fail_on: String,
    }

    #[async_trait::async_trait]
    impl Journal for FlakyJournal {
        async fn get_applied(&self) -> MigrateResult<Vec<AppliedRecord>> {
            self.inner.get_applied().await
        }

        async fn record_applied(
            &self,
            descriptor: &MigrationDescriptor,
            direction: Direction,
        ) -> MigrateResult<()> {
            if descriptor.name() == self.fail_on {
                return Err(MigrationError::journal("disk I/O error"));
            }
            self.inner.record_applied(descriptor, direction).await
        }

        async fn record_legacy_script(&self, name: &str) -> MigrateResult<()> {
            self.inner.record_legacy_script(name).await
        }

        async fn has_applied(&self, version: i64, kind: MigrationKind) -> MigrateResult<bool> {
            self.inner.has_applied(version, kind).await
        }
    }

    #[tokio::test]
    async fn test_journal_failure_stops_batch() {
        let inner = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        let engine = UpgradeEngine::builder(
            FlakyJournal {
                inner: inner.clone(),
                fail_on: "s2".to_string(),
            },
            executor.clone(),
        )
        .with_descriptors(StaticDescriptorProvider::new(vec![
            schema(1, "s1"),
            schema(2, "s2"),
            schema(3, "s3"),
        ]))
        .build();

        let result = engine.perform_migration(LATEST_VERSION, StepFilter::All).await;

        assert!(!result.successful);
        assert_eq!(result.executed_names(), vec!["s1"]);
        assert_eq!(result.failed_script(), Some("s2"));
        assert_eq!(
            result.cause().map(MigrationError::category),
            Some(ErrorCategory::Journal)
        );
        // s2 ran but could not be recorded; s3 never started.
        assert_eq!(executor.names(), vec!["s1", "s2"]);
        assert_eq!(inner.names(), vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_verify_schema_failure() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor {
            fail_verify: true,
            ..Default::default()
        };
        let engine = engine(&journal, &executor, vec![schema(1, "s1")]);

        let result = engine.perform_migration(LATEST_VERSION, StepFilter::All).await;

        assert!(!result.successful);
        assert_eq!(result.failed_script(), None);
        assert!(executor.names().is_empty());
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn test_negative_target_rejected_before_side_effects() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        let manager = CountingConnectionManager::default();
        let engine = UpgradeEngine::builder(journal.clone(), executor.clone())
            .connection_manager(manager.clone())
            .with_descriptors(StaticDescriptorProvider::new(vec![schema(1, "s1")]))
            .build();

        let result = engine.perform_migration(-5, StepFilter::All).await;

        assert!(!result.successful);
        assert_eq!(
            result.cause().map(MigrationError::category),
            Some(ErrorCategory::Planning)
        );
        assert_eq!(manager.opened.load(Ordering::SeqCst), 0);
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn test_scope_released_on_every_path() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::failing_on("s2");
        let manager = CountingConnectionManager::default();
        let engine = UpgradeEngine::builder(journal.clone(), executor.clone())
            .connection_manager(manager.clone())
            .with_descriptors(StaticDescriptorProvider::new(vec![schema(1, "s1"), schema(2, "s2")]))
            .build();

        assert!(!engine.perform_migration(LATEST_VERSION, StepFilter::All).await.successful);
        assert!(engine.is_upgrade_required().await.unwrap());
        assert!(engine.mark_as_executed(None).await.successful);

        let opened = manager.opened.load(Ordering::SeqCst);
        assert_eq!(opened, 3);
        assert_eq!(manager.released.load(Ordering::SeqCst), opened);
    }

    #[tokio::test]
    async fn test_mark_as_executed_never_calls_executor() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        let engine = engine(
            &journal,
            &executor,
            vec![
                schema(SCHEMA_V, "beforecode_schema"),
                MigrationDescriptor::data(DATA_V, "beforecode_data", "UPDATE").depends_on(SCHEMA_V),
                schema(20160609150800, "aftercode_schema"),
            ],
        );

        let result = engine.mark_as_executed(None).await;

        assert!(result.successful);
        assert_eq!(
            result.executed_names(),
            vec!["beforecode_schema", "beforecode_data", "aftercode_schema"]
        );
        assert!(executor.names().is_empty());
        assert_eq!(executor.verify_calls.load(Ordering::SeqCst), 0);
        assert_eq!(journal.len(), 3);
        assert!(!engine.is_upgrade_required().await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_as_executed_up_to() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        let engine = engine(&journal, &executor, vec![schema(1, "s1"), schema(2, "s2"), schema(3, "s3")]);

        let result = engine.mark_as_executed(Some("s2")).await;
        assert!(result.successful);
        assert_eq!(result.executed_names(), vec!["s1", "s2"]);

        let rest = engine.perform_migration(LATEST_VERSION, StepFilter::All).await;
        assert_eq!(rest.executed_names(), vec!["s3"]);
    }

    #[tokio::test]
    async fn test_mark_as_executed_unknown_name() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        let engine = engine(&journal, &executor, vec![schema(1, "s1")]);

        let result = engine.mark_as_executed(Some("missing")).await;
        assert!(!result.successful);
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn test_step_filter_phases() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        let engine = engine(
            &journal,
            &executor,
            vec![
                schema(1, "a").with_step(ExecutionStep::BeforeCode),
                schema(2, "b").with_step(ExecutionStep::AfterCode),
            ],
        );

        let plan = engine
            .get_migrations_to_execute(2, StepFilter::BeforeCode)
            .await
            .unwrap();
        assert_eq!(plan.forward.len(), 1);

        let before = engine.perform_migration(2, StepFilter::BeforeCode).await;
        assert_eq!(before.executed_names(), vec!["a"]);

        let after = engine.perform_migration(2, StepFilter::AfterCode).await;
        assert_eq!(after.executed_names(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_migrate_uses_config_and_variables() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        let engine = UpgradeEngine::builder(journal.clone(), executor.clone())
            .config(
                UpgradeConfig::new()
                    .target_version(1)
                    .variable("schema", "app"),
            )
            .with_descriptors(StaticDescriptorProvider::new(vec![
                MigrationDescriptor::schema(1, "s1", "CREATE TABLE $schema$.t (id INT)", ""),
                schema(2, "s2"),
            ]))
            .build();

        let result = engine.migrate().await;

        assert!(result.successful);
        assert_eq!(executor.texts(), vec!["CREATE TABLE app.t (id INT)"]);
    }

    #[tokio::test]
    async fn test_perform_upgrade_flat_scripts() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        let engine = UpgradeEngine::builder(journal.clone(), executor.clone())
            .with_scripts(StaticScriptProvider::new(vec![
                SqlScript::new("002_b.sql", "B"),
                SqlScript::new("001_a.sql", "A"),
            ]))
            .build();

        assert!(engine.is_upgrade_required().await.unwrap());
        assert_eq!(engine.get_scripts_to_execute().await.unwrap().len(), 2);

        let result = engine.perform_upgrade().await;
        assert!(result.successful);
        assert_eq!(executor.names(), vec!["002_b.sql", "001_a.sql"]);
        assert_eq!(result.executed[0].version, None);

        let again = engine.perform_upgrade().await;
        assert!(again.successful);
        assert!(again.executed.is_empty());
        assert!(!engine.is_upgrade_required().await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_scripts_as_executed() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        let engine = UpgradeEngine::builder(journal.clone(), executor.clone())
            .with_scripts(StaticScriptProvider::new(vec![
                SqlScript::new("001.sql", "A"),
                SqlScript::new("002.sql", "B"),
                SqlScript::new("003.sql", "C"),
            ]))
            .build();

        let marked = engine.mark_scripts_as_executed(Some("002.sql")).await;
        assert!(marked.successful);
        assert_eq!(marked.executed_names(), vec!["001.sql", "002.sql"]);

        let pending = engine.get_scripts_to_execute().await.unwrap();
        assert_eq!(pending, vec![SqlScript::new("003.sql", "C")]);
        assert!(executor.names().is_empty());
    }

    #[tokio::test]
    async fn test_get_migrated_versions() {
        let descriptors = vec![schema(2, "s2"), schema(1, "s1")];
        let journal = InMemoryJournal::with_applied(&descriptors).unwrap();
        let engine = engine(&journal, &RecordingExecutor::default(), descriptors);

        let versions: Vec<_> = engine
            .get_migrated_versions()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_names_fail_planning() {
        let journal = InMemoryJournal::new();
        let executor = RecordingExecutor::default();
        let engine = engine(&journal, &executor, vec![schema(1, "dup"), schema(2, "dup")]);

        let result = engine.perform_migration(LATEST_VERSION, StepFilter::All).await;
        assert!(!result.successful);
        assert!(matches!(result.cause(), Some(MigrationError::Planning(_))));
        assert!(executor.names().is_empty());
    }
}
