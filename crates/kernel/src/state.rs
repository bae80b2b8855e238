//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::auth::{AuthService, AuthStats, JwtKeys, TokenService};
use crate::cache::CacheLayer;
use crate::collection::CollectionRegistry;
use crate::config::Config;
use crate::db;
use crate::hook::{HookDispatcher, HookRegistry};
use crate::jobs::{
    HttpJobTrigger, JobQueue, JobRegistry, JobRunner, JobRuntime, JobTrigger, LocalJobTrigger,
};
use crate::plugin::{BootReport, CorePlugin, Plugin, PluginDiagnostic, Registrar};
use crate::query::{QueryBuilder, QueryError};
use crate::schema::{MigrationPlan, MigrationReport, SchemaMigrator, TableSchema, system_tables};
use crate::store::{MemoryStore, PgStore, Store, StoreError};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,

    /// Durable record store.
    store: Arc<dyn Store>,

    /// Optional key-value cache. Absent backends make every call a miss.
    cache: CacheLayer,

    /// Compiled collections.
    collections: CollectionRegistry,

    hooks: HookDispatcher,

    jobs: JobRegistry,
    job_runtime: JobRuntime,
    job_trigger: Arc<dyn JobTrigger>,

    jwt: JwtKeys,
    auth_stats: AuthStats,

    /// Registration and compile problems found at boot.
    registration: Vec<PluginDiagnostic>,
}

/// Assembles an [`AppState`] from configuration, backends and plugins.
///
/// The core plugin is always registered first.
pub struct AppStateBuilder {
    config: Config,
    store: Option<Arc<dyn Store>>,
    cache: CacheLayer,
    trigger: Option<Arc<dyn JobTrigger>>,
    plugins: Vec<Box<dyn Plugin>>,
}

impl AppStateBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            cache: CacheLayer::disabled(),
            trigger: None,
            plugins: Vec::new(),
        }
    }

    /// Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(mut self, cache: CacheLayer) -> Self {
        self.cache = cache;
        self
    }

    /// Defaults to running dispatches in this process.
    pub fn trigger(mut self, trigger: Arc<dyn JobTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    pub fn plugins(mut self, plugins: impl IntoIterator<Item = Box<dyn Plugin>>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    /// Run plugin registration and compile every collection.
    ///
    /// Registration problems are logged and kept in the boot report; they
    /// never fail the build.
    pub fn build(self) -> AppState {
        let mut registrar = Registrar::new();
        registrar.register(&CorePlugin::new(self.config.token_sweep_interval));
        for plugin in &self.plugins {
            registrar.register(plugin.as_ref());
        }
        let registrations = registrar.finish();
        let mut registration = registrations.diagnostics;

        let collections = CollectionRegistry::new(
            Arc::new(registrations.fields),
            registrations.collections,
        );

        let unknown_owners: Vec<String> = registrations
            .hook_owners
            .iter()
            .filter(|(_, collection)| !collections.contains(collection))
            .map(|(plugin, _)| plugin.clone())
            .collect();
        let (hook_registry, hook_errors) =
            HookRegistry::build(registrations.hooks, |name| collections.contains(name));
        for (plugin, error) in unknown_owners.into_iter().zip(hook_errors) {
            warn!(plugin = %plugin, error = %error, "registration error");
            registration.push(PluginDiagnostic { plugin, error });
        }

        let jwt = JwtKeys::new(self.config.jwt_secret.as_bytes());
        let job_runtime = JobRuntime::new(self.config.job_token_lifetime);

        let state = AppState {
            inner: Arc::new(AppStateInner {
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(MemoryStore::new())),
                cache: self.cache,
                collections,
                hooks: HookDispatcher::new(Arc::new(hook_registry)),
                jobs: registrations.jobs,
                job_runtime,
                job_trigger: self
                    .trigger
                    .unwrap_or_else(|| Arc::new(LocalJobTrigger)),
                jwt,
                auth_stats: AuthStats::default(),
                registration,
                config: self.config,
            }),
        };

        let report = state.boot_report();
        info!(
            store = state.store().backend(),
            cache = state.cache().source_name(),
            collections = state.collections().names().len(),
            hooks = state.hooks().registry().len(),
            jobs = state.jobs().len(),
            errors = report.error_count(),
            "application state ready"
        );
        state
    }
}

impl AppState {
    pub fn builder(config: Config) -> AppStateBuilder {
        AppStateBuilder::new(config)
    }

    /// Create state with the backends the configuration names.
    ///
    /// Without `DATABASE_URL` records live in memory; without `REDIS_URL`
    /// caching is off. Jobs are dispatched over HTTP to `SITE_URL`.
    pub async fn from_config(
        config: Config,
        plugins: impl IntoIterator<Item = Box<dyn Plugin>>,
    ) -> Result<Self> {
        let store: Arc<dyn Store> = match &config.database_url {
            Some(url) => {
                let pool = db::create_pool(url, config.database_max_connections)
                    .await
                    .context("failed to create database pool")?;
                Arc::new(PgStore::new(pool))
            }
            None => {
                warn!("DATABASE_URL not set, records are kept in memory");
                Arc::new(MemoryStore::new())
            }
        };

        let cache = match &config.redis_url {
            Some(url) => CacheLayer::redis(url.clone()),
            None => CacheLayer::disabled(),
        };

        let trigger =
            HttpJobTrigger::new(&config.site_url).context("failed to create job trigger")?;

        Ok(AppStateBuilder::new(config)
            .store(store)
            .cache(cache)
            .trigger(Arc::new(trigger))
            .plugins(plugins)
            .build())
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.inner.cache
    }

    pub fn collections(&self) -> &CollectionRegistry {
        &self.inner.collections
    }

    pub fn hooks(&self) -> &HookDispatcher {
        &self.inner.hooks
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.inner.jobs
    }

    pub(crate) fn job_runtime(&self) -> &JobRuntime {
        &self.inner.job_runtime
    }

    pub fn job_trigger(&self) -> &Arc<dyn JobTrigger> {
        &self.inner.job_trigger
    }

    pub fn jwt(&self) -> &JwtKeys {
        &self.inner.jwt
    }

    pub fn auth_stats(&self) -> &AuthStats {
        &self.inner.auth_stats
    }

    /// Start a query on a collection.
    pub fn query(&self, collection: &str) -> Result<QueryBuilder, QueryError> {
        let compiled = self
            .collections()
            .get(collection)
            .ok_or_else(|| QueryError::UnknownCollection(collection.to_string()))?;
        Ok(QueryBuilder::new(self.clone(), compiled))
    }

    pub fn tokens(&self) -> TokenService {
        TokenService::new(self.clone())
    }

    pub fn auth(&self) -> AuthService {
        AuthService::new(self.clone())
    }

    pub fn job_queue(&self) -> JobQueue {
        JobQueue::new(self.clone())
    }

    pub fn job_runner(&self) -> JobRunner {
        JobRunner::new(self.clone())
    }

    /// Tables the store should have: system tables plus every compiled
    /// collection.
    pub fn tables(&self) -> Vec<TableSchema> {
        let mut tables = system_tables();
        tables.extend(self.collections().tables());
        tables
    }

    pub async fn migration_plan(
        &self,
        allow_destructive: bool,
    ) -> Result<MigrationPlan, StoreError> {
        SchemaMigrator::plan(self.store().as_ref(), &self.tables(), allow_destructive).await
    }

    /// Bring the store's tables up to date.
    pub async fn migrate(&self, allow_destructive: bool) -> Result<MigrationReport, StoreError> {
        let report =
            SchemaMigrator::migrate(self.store().as_ref(), &self.tables(), allow_destructive)
                .await?;
        info!(
            applied = report.applied,
            skipped = report.skipped,
            "schema migrated"
        );
        Ok(report)
    }

    pub fn boot_report(&self) -> BootReport {
        BootReport {
            registration: self.inner.registration.clone(),
            compile: self.collections().diagnostics(),
        }
    }

    /// Check if the store is reachable.
    pub async fn healthy(&self) -> bool {
        self.store().healthy().await
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.inner.store.backend())
            .field("collections", &self.inner.collections)
            .field("jobs", &self.inner.jobs.names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::USERS_COLLECTION;
    use crate::collection::{CollectionDefinition, CollectionField};
    use crate::hook::{HookAction, hook};
    use crate::plugin::{RegistrationError, Registrar};

    struct Faulty;

    impl Plugin for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }

        fn register(&self, registrar: &mut Registrar) {
            registrar.collection(CollectionDefinition::new(USERS_COLLECTION));
            registrar.collection(
                CollectionDefinition::new("notes").field(CollectionField::new("body", "missing")),
            );
            registrar.hook("ghosts", HookAction::BeforeRead, hook(|_| Ok(())));
        }
    }

    #[test]
    fn core_registrations_are_present() {
        let state = AppState::builder(Config::default()).build();
        assert!(state.boot_report().is_clean());
        assert!(state.collections().contains(USERS_COLLECTION));
        assert!(state.jobs().get("clean-expired-tokens").is_some());
        assert!(state.query(USERS_COLLECTION).is_ok());
        assert!(matches!(
            state.query("nope"),
            Err(QueryError::UnknownCollection(_))
        ));
    }

    #[test]
    fn registration_problems_do_not_stop_boot() {
        let state = AppState::builder(Config::default()).plugin(Faulty).build();
        let report = state.boot_report();

        assert_eq!(report.error_count(), 3);
        assert!(report.registration.iter().any(|d| d.plugin == "faulty"
            && d.error == RegistrationError::DuplicateCollection(USERS_COLLECTION.into())));
        assert!(report.registration.iter().any(|d| matches!(
            &d.error,
            RegistrationError::UnknownHookCollection { collection, .. } if collection == "ghosts"
        )));
        assert_eq!(report.compile.len(), 1);
        assert!(state.query(USERS_COLLECTION).is_ok());
    }

    #[tokio::test]
    async fn migrate_creates_system_and_collection_tables() {
        let state = AppState::builder(Config::default()).build();
        let report = state.migrate(false).await.unwrap();
        assert!(report.created_tables.contains(&"tokens".to_string()));
        assert!(report.created_tables.contains(&"jobs".to_string()));
        assert!(report.created_tables.contains(&USERS_COLLECTION.to_string()));
        assert!(state.migration_plan(false).await.unwrap().is_empty());
    }
}
