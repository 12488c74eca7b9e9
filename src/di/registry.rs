//! Cross-module resolution.
//!
//! The [`TransferRegistry`] owns every [`ModuleRecord`] of one application.
//! Modules are added while the registry is `Preparing`; [`initialize`]
//! infers missing imports from the export index, then runs a fixed-point
//! loop that re-attempts unresolved providers until every one is resolved
//! or a full pass makes no progress.
//!
//! [`initialize`]: TransferRegistry::initialize

use super::factory::PendingFactories;
use super::graph::{ExportIndex, ModuleBlueprint, ModuleRecord, ModuleState, ResolveContext};
use super::provider::Instance;
use super::token::ProviderToken;
use crate::error::{Result, TrellisError, UnresolvedProvider};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Identifies one application's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApplicationKey(Uuid);

impl ApplicationKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ApplicationKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RegistryState {
    Preparing,
    Resolving,
    Ready,
}

/// Bounded wait applied to pending factories.
#[derive(Debug, Clone, Copy)]
pub struct FactoryPolling {
    pub interval: Duration,
    pub retries: u32,
}

impl Default for FactoryPolling {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10),
            retries: 300,
        }
    }
}

pub struct TransferRegistry {
    key: ApplicationKey,
    state: RegistryState,
    modules: Vec<ModuleRecord>,
    module_index: HashMap<String, usize>,
    /// Every (provider token, owning module) pair, in registration order.
    locator: Vec<(ProviderToken, usize)>,
    /// First module to register each token.
    located: HashMap<ProviderToken, usize>,
    exports: ExportIndex,
    pending: PendingFactories,
    polling: FactoryPolling,
}

impl TransferRegistry {
    /// A fresh registry. Nothing is shared with any other instance, even one
    /// created under the same key.
    pub fn create_new(key: ApplicationKey) -> Self {
        debug!(key = %key, "Creating transfer registry");
        Self {
            key,
            state: RegistryState::Preparing,
            modules: Vec::new(),
            module_index: HashMap::new(),
            locator: Vec::new(),
            located: HashMap::new(),
            exports: ExportIndex::default(),
            pending: PendingFactories::new(),
            polling: FactoryPolling::default(),
        }
    }

    pub fn with_polling(mut self, polling: FactoryPolling) -> Self {
        self.polling = polling;
        self
    }

    pub fn key(&self) -> ApplicationKey {
        self.key
    }

    pub fn state(&self) -> RegistryState {
        self.state
    }

    /// Register a module and resolve whatever it can resolve on its own.
    pub fn add_module(&mut self, blueprint: ModuleBlueprint) -> Result<()> {
        if self.state != RegistryState::Preparing {
            return Err(TrellisError::ModuleRegistrationFailed {
                message: format!(
                    "cannot add module '{}' while the registry is {}",
                    blueprint.name, self.state
                ),
            });
        }
        if self.module_index.contains_key(&blueprint.name) {
            return Err(TrellisError::ModuleRegistrationFailed {
                message: format!("module '{}' is already registered", blueprint.name),
            });
        }

        let id = self.modules.len();
        let mut module = ModuleRecord::new(id, blueprint)?;

        for token in module.dangling_exports() {
            warn!(module = %module.name(), provider = %token, "Exported token is not declared in the module, ignoring");
        }
        for token in module.exported_tokens() {
            if !self.exports.declare(token.clone(), id) {
                warn!(module = %module.name(), provider = %token, "Provider already exported by another module, keeping the first exporter");
            }
        }

        let mut ctx = ResolveContext::new(&self.exports, &mut self.pending, false);
        module.register_all(&mut ctx)?;

        for record in module.providers() {
            self.locator.push((record.token.clone(), id));
            if self.located.contains_key(&record.token) {
                debug!(module = %module.name(), provider = %record.token, "Token already located in another module");
                continue;
            }
            self.located.insert(record.token.clone(), id);
        }

        info!(
            module = %module.name(),
            providers = module.providers().count(),
            controllers = module.controllers().len(),
            root = module.is_root(),
            "Module registered"
        );
        self.module_index.insert(module.name().to_string(), id);
        self.modules.push(module);
        self.publish_exports(id);
        Ok(())
    }

    /// Resolve every provider and instantiate every controller.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.state != RegistryState::Preparing {
            return Err(TrellisError::ModuleRegistrationFailed {
                message: format!("registry {} is already {}", self.key, self.state),
            });
        }
        info!(key = %self.key, modules = self.modules.len(), "Initializing modules");

        self.infer_global_imports();
        self.settle_factories().await?;

        self.state = RegistryState::Resolving;
        for module in &mut self.modules {
            module.set_state(ModuleState::Resolving);
        }

        self.begin_resolving_phase().await?;
        self.closing_resolving_phase()?;

        self.state = RegistryState::Ready;
        info!(key = %self.key, providers = self.locator.len(), "All modules ready");
        Ok(())
    }

    fn infer_global_imports(&mut self) {
        for id in 0..self.modules.len() {
            let required = self.modules[id].external_requirements();
            for token in required {
                let exported_elsewhere = self
                    .exports
                    .get(&token)
                    .is_some_and(|entry| entry.module != id);
                if exported_elsewhere {
                    self.modules[id].add_import(token);
                }
            }
        }
    }

    async fn begin_resolving_phase(&mut self) -> Result<()> {
        let mut pass = 0usize;
        loop {
            self.apply_completed()?;
            let before = self.unresolved_count();
            if before == 0 {
                return Ok(());
            }
            pass += 1;

            let candidates: Vec<(ProviderToken, usize)> = self
                .locator
                .iter()
                .filter(|(token, module)| {
                    let module = &self.modules[*module];
                    !module.is_resolved(token) && !module.is_pending(token)
                })
                .cloned()
                .collect();

            for (token, id) in candidates {
                self.update_provider(id, &token)?;
            }

            self.settle_factories().await?;

            let after = self.unresolved_count();
            debug!(pass, before, after, "Resolution pass finished");
            if after >= before {
                return Err(self.deadlock());
            }
        }
    }

    fn update_provider(&mut self, id: usize, token: &ProviderToken) -> Result<()> {
        let module = &mut self.modules[id];
        let mut ctx = ResolveContext::new(&self.exports, &mut self.pending, true);
        module.update_provider(token, &mut ctx)?;
        self.publish_exports(id);
        Ok(())
    }

    /// Start queued factories, wait within the polling budget, and apply
    /// whatever finished.
    async fn settle_factories(&mut self) -> Result<()> {
        if self.pending.has_queued() {
            self.pending.start();
        }
        if self.pending.in_flight() > 0 {
            let gate = self.pending.gate();
            gate.wait(self.polling.interval, self.polling.retries).await;
        }
        self.apply_completed()
    }

    fn apply_completed(&mut self) -> Result<()> {
        for (id, token, outcome) in self.pending.drain_completed() {
            let module = self.modules.get_mut(id).ok_or_else(|| {
                TrellisError::Internal(format!("factory completed for unknown module #{id}"))
            })?;
            module.complete_factory(&token, outcome)?;
            self.publish_exports(id);
        }
        Ok(())
    }

    fn publish_exports(&mut self, id: usize) {
        let module = &self.modules[id];
        for token in module.exported_tokens() {
            if let Some(instance) = module.provider(&token).and_then(|record| record.instance.clone()) {
                self.exports.publish(&token, id, instance);
            }
        }
    }

    fn closing_resolving_phase(&mut self) -> Result<()> {
        for module in &mut self.modules {
            module.finish_initialization(&self.exports)?;
        }
        Ok(())
    }

    fn unresolved_count(&self) -> usize {
        self.modules
            .iter()
            .map(|module| module.unresolved().count())
            .sum()
    }

    fn deadlock(&self) -> TrellisError {
        let providers: Vec<UnresolvedProvider> = self
            .modules
            .iter()
            .flat_map(|module| {
                module.unresolved().map(|record| UnresolvedProvider {
                    module: module.name().to_string(),
                    provider: record.token.to_string(),
                    missing: record.missing.clone(),
                })
            })
            .collect();
        error!(count = providers.len(), "Dependency resolution made no progress");
        TrellisError::UnresolvedDependencies { providers }
    }

    pub fn module(&self, name: &str) -> Option<&ModuleRecord> {
        self.module_index.get(name).map(|id| &self.modules[*id])
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.iter()
    }

    pub fn exports(&self) -> &ExportIndex {
        &self.exports
    }

    /// Look a provider up through the flat locator.
    pub fn resolve_from_location(&self, token: &ProviderToken) -> Option<Instance> {
        let id = self.located.get(token)?;
        self.modules[*id]
            .provider(token)
            .and_then(|record| record.instance.clone())
    }

    /// A provider as seen from inside `module`.
    pub fn get_provider(&self, module: &str, token: &ProviderToken) -> Option<Instance> {
        self.module(module)?.get_provider(token, &self.exports)
    }

    /// Typed lookup through the locator.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.get_token(&ProviderToken::of::<T>())
    }

    pub fn get_token<T: Send + Sync + 'static>(&self, token: &ProviderToken) -> Option<Arc<T>> {
        self.resolve_from_location(token)?.downcast::<T>().ok()
    }

    /// Where a provider lives and whether it is resolved.
    pub fn locate(&self, token: &ProviderToken) -> Option<(&str, bool)> {
        let id = self.located.get(token)?;
        let module = &self.modules[*id];
        Some((module.name(), module.is_resolved(token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{Args, ClassDescriptor, Dependencies, Dependency, Injectable, Provider};

    struct Connection {
        url: Arc<String>,
    }

    impl Injectable for Connection {
        fn dependencies() -> Vec<Dependency> {
            Dependencies::new().token("DB_URL").build()
        }

        fn inject(args: &Args) -> Result<Self> {
            Ok(Connection { url: args.get(0)? })
        }
    }

    struct UserService {
        connection: Arc<Connection>,
    }

    impl Injectable for UserService {
        fn dependencies() -> Vec<Dependency> {
            Dependencies::new().class::<Connection>().build()
        }

        fn inject(args: &Args) -> Result<Self> {
            Ok(UserService {
                connection: args.get(0)?,
            })
        }
    }

    struct UserController {
        users: Arc<UserService>,
    }

    impl Injectable for UserController {
        fn dependencies() -> Vec<Dependency> {
            Dependencies::new().class::<UserService>().build()
        }

        fn inject(args: &Args) -> Result<Self> {
            Ok(UserController { users: args.get(0)? })
        }
    }

    fn database_module() -> ModuleBlueprint {
        ModuleBlueprint {
            name: "DatabaseModule".into(),
            exports: vec![ProviderToken::of::<Connection>()],
            providers: vec![
                Provider::value("DB_URL", "postgres://db".to_string()),
                Provider::class::<Connection>(),
            ],
            ..Default::default()
        }
    }

    fn users_module() -> ModuleBlueprint {
        ModuleBlueprint {
            name: "UsersModule".into(),
            imports: vec![ProviderToken::of::<Connection>()],
            providers: vec![Provider::class::<UserService>()],
            controllers: vec![ClassDescriptor::of::<UserController>()],
            ..Default::default()
        }
    }

    async fn initialized(blueprints: Vec<ModuleBlueprint>) -> Result<TransferRegistry> {
        let mut registry = TransferRegistry::create_new(ApplicationKey::new());
        for blueprint in blueprints {
            registry.add_module(blueprint)?;
        }
        registry.initialize().await?;
        Ok(registry)
    }

    async fn failure(blueprints: Vec<ModuleBlueprint>) -> TrellisError {
        match initialized(blueprints).await {
            Ok(_) => panic!("initialization should have failed"),
            Err(err) => err,
        }
    }

    #[tokio::test]
    async fn test_resolution_is_independent_of_module_order() {
        for blueprints in [
            vec![database_module(), users_module()],
            vec![users_module(), database_module()],
        ] {
            let registry = initialized(blueprints).await.expect("initialize");
            assert_eq!(registry.state(), RegistryState::Ready);
            let users = registry.get::<UserService>().unwrap();
            assert_eq!(users.connection.url.as_str(), "postgres://db");

            let module = registry.module("UsersModule").unwrap();
            assert_eq!(module.state(), ModuleState::Ready);
            let controller = module
                .controller(&ProviderToken::of::<UserController>())
                .unwrap()
                .clone()
                .downcast::<UserController>()
                .unwrap();
            assert!(Arc::ptr_eq(&controller.users, &users));
        }
    }

    #[tokio::test]
    async fn test_imports_are_inferred_from_exports() {
        let mut users = users_module();
        users.imports.clear();
        let registry = initialized(vec![users, database_module()]).await.unwrap();
        assert!(registry.get::<UserService>().is_some());
        assert_eq!(
            registry.module("UsersModule").unwrap().imports(),
            &[ProviderToken::of::<Connection>()]
        );
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_initialization() {
        let err = failure(vec![users_module()]).await;
        assert!(err.is_dependency_error(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_unexported_sibling_provider_is_not_visible() {
        let mut database = database_module();
        database.exports.clear();
        let err = failure(vec![database, users_module()]).await;
        match err {
            TrellisError::DependencyNotFound { requester, module, .. } => {
                assert!(requester.ends_with("UserService"));
                assert_eq!(module, "UsersModule");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_root_module_exports_everything() {
        let mut database = database_module();
        database.exports.clear();
        database.root = true;
        let registry = initialized(vec![users_module(), database]).await.unwrap();
        assert!(registry.get::<UserService>().is_some());
    }

    #[tokio::test]
    async fn test_async_factory_feeds_consumer() {
        let blueprint = ModuleBlueprint {
            name: "AppModule".into(),
            providers: vec![
                Provider::factory_sync("DOUBLED", Dependencies::new().token("ANSWER").build(), |args| {
                    Ok(*args.get::<u32>(0)? * 2)
                }),
                Provider::factory_async("ANSWER", vec![], |_| async { Ok(42u32) }),
            ],
            ..Default::default()
        };
        let registry = initialized(vec![blueprint]).await.unwrap();
        let answer = registry.get_token::<u32>(&ProviderToken::named("ANSWER")).unwrap();
        let doubled = registry.get_token::<u32>(&ProviderToken::named("DOUBLED")).unwrap();
        assert_eq!(*answer, 42);
        assert_eq!(*doubled, 84);
    }

    #[tokio::test]
    async fn test_stalled_factory_is_reported_as_deadlock() {
        let blueprint = ModuleBlueprint {
            name: "SlowModule".into(),
            providers: vec![Provider::factory_async("NEVER", vec![], |_| async {
                std::future::pending::<()>().await;
                Ok(0u8)
            })],
            ..Default::default()
        };
        let mut registry = TransferRegistry::create_new(ApplicationKey::new()).with_polling(FactoryPolling {
            interval: Duration::from_millis(1),
            retries: 2,
        });
        registry.add_module(blueprint).unwrap();
        let err = registry.initialize().await.unwrap_err();
        let TrellisError::UnresolvedDependencies { providers } = err else {
            panic!("expected aggregate error");
        };
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].provider, "NEVER");
        assert!(providers[0].missing.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_from_location() {
        let registry = initialized(vec![database_module()]).await.unwrap();
        let url = registry
            .resolve_from_location(&ProviderToken::named("DB_URL"))
            .unwrap()
            .downcast::<String>()
            .unwrap();
        assert_eq!(url.as_str(), "postgres://db");
        assert_eq!(
            registry.locate(&ProviderToken::named("DB_URL")),
            Some(("DatabaseModule", true))
        );
        assert!(registry.resolve_from_location(&ProviderToken::named("nope")).is_none());
    }

    #[test]
    fn test_duplicate_module_name_is_rejected() {
        let mut registry = TransferRegistry::create_new(ApplicationKey::new());
        registry.add_module(database_module()).unwrap();
        assert!(registry.add_module(database_module()).is_err());
    }

    #[test]
    fn test_create_new_is_isolated() {
        let key = ApplicationKey::new();
        let mut first = TransferRegistry::create_new(key);
        first.add_module(database_module()).unwrap();
        let second = TransferRegistry::create_new(key);
        assert_eq!(second.key(), key);
        assert_eq!(second.modules().count(), 0);
    }
}
