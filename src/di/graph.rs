//! Per-module provider graph.
//!
//! A [`ModuleRecord`] owns the raw provider declarations of one module and the
//! [`ProviderRecord`]s created from them. Resolution is attempted eagerly at
//! registration; a provider whose dependencies live in another module that
//! has not produced them yet is left unresolved and retried by the
//! registry's fixed-point loop.

use super::factory::PendingFactories;
use super::provider::{Args, ClassDescriptor, FactoryOutput, Instance, ProviderDescriptor, ProviderKind};
use super::token::{Dependency, ProviderToken};
use crate::error::{Result, TrellisError};
use std::collections::{HashMap, HashSet};
use strum_macros::Display;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ModuleState {
    Declared,
    Resolving,
    Ready,
}

/// Everything the container needs to know about one module.
#[derive(Clone, Default)]
pub struct ModuleBlueprint {
    pub name: String,
    pub root: bool,
    pub imports: Vec<ProviderToken>,
    pub exports: Vec<ProviderToken>,
    pub providers: Vec<ProviderDescriptor>,
    pub controllers: Vec<ClassDescriptor>,
}

/// One registered provider.
#[derive(Clone)]
pub struct ProviderRecord {
    pub token: ProviderToken,
    pub kind: ProviderKind,
    pub dependencies: Vec<Dependency>,
    pub instance: Option<Instance>,
    pub resolved: bool,
    pub(crate) pending: bool,
    /// Dependencies that blocked the last resolution attempt.
    pub(crate) missing: Vec<String>,
    descriptor: ProviderDescriptor,
}

impl ProviderRecord {
    fn new(descriptor: ProviderDescriptor) -> Self {
        Self {
            token: descriptor.token().clone(),
            kind: descriptor.kind(),
            dependencies: descriptor.dependencies(),
            instance: None,
            resolved: false,
            pending: false,
            missing: Vec::new(),
            descriptor,
        }
    }

    fn settle(&mut self, instance: Instance) {
        self.instance = Some(instance);
        self.resolved = true;
        self.pending = false;
        self.missing.clear();
    }
}

/// Exported providers of every module, keyed by token.
#[derive(Default)]
pub struct ExportIndex {
    entries: HashMap<ProviderToken, ExportEntry>,
}

#[derive(Clone)]
pub struct ExportEntry {
    pub module: usize,
    pub instance: Option<Instance>,
}

impl ExportIndex {
    pub fn get(&self, token: &ProviderToken) -> Option<&ExportEntry> {
        self.entries.get(token)
    }

    pub fn contains(&self, token: &ProviderToken) -> bool {
        self.entries.contains_key(token)
    }

    /// Record `module` as the exporter of `token`. The first exporter wins.
    pub(crate) fn declare(&mut self, token: ProviderToken, module: usize) -> bool {
        if self.entries.contains_key(&token) {
            return false;
        }
        self.entries.insert(
            token,
            ExportEntry {
                module,
                instance: None,
            },
        );
        true
    }

    pub(crate) fn publish(&mut self, token: &ProviderToken, module: usize, instance: Instance) {
        if let Some(entry) = self.entries.get_mut(token) {
            if entry.module == module && entry.instance.is_none() {
                entry.instance = Some(instance);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// State threaded through one resolution attempt.
pub(crate) struct ResolveContext<'a> {
    pub exports: &'a ExportIndex,
    pub pending: &'a mut PendingFactories,
    /// Once imports have been inferred, a dependency that is nowhere to be
    /// found is an error instead of a reason to wait.
    pub strict: bool,
    stack: Vec<ProviderToken>,
}

impl<'a> ResolveContext<'a> {
    pub(crate) fn new(exports: &'a ExportIndex, pending: &'a mut PendingFactories, strict: bool) -> Self {
        Self {
            exports,
            pending,
            strict,
            stack: Vec::new(),
        }
    }
}

enum Lookup {
    Found(Instance),
    Absent,
    Waiting,
}

enum Collected {
    Ready(Vec<Option<Instance>>),
    Waiting(Vec<String>),
}

pub struct ModuleRecord {
    pub(crate) id: usize,
    name: String,
    root: bool,
    state: ModuleState,
    declarations: HashMap<ProviderToken, ProviderDescriptor>,
    declaration_order: Vec<ProviderToken>,
    providers: HashMap<ProviderToken, ProviderRecord>,
    order: Vec<ProviderToken>,
    imports: Vec<ProviderToken>,
    exports: HashSet<ProviderToken>,
    controllers: Vec<ClassDescriptor>,
    controller_instances: HashMap<ProviderToken, Instance>,
}

impl ModuleRecord {
    pub(crate) fn new(id: usize, blueprint: ModuleBlueprint) -> Result<Self> {
        let mut declarations = HashMap::new();
        let mut declaration_order = Vec::new();
        for descriptor in blueprint.providers {
            descriptor.validate()?;
            let token = descriptor.token().clone();
            if declarations.contains_key(&token) {
                debug!(module = %blueprint.name, provider = %token, "Duplicate provider declaration ignored");
                continue;
            }
            declaration_order.push(token.clone());
            declarations.insert(token, descriptor);
        }

        Ok(Self {
            id,
            name: blueprint.name,
            root: blueprint.root,
            state: ModuleState::Declared,
            declarations,
            declaration_order,
            providers: HashMap::new(),
            order: Vec::new(),
            imports: blueprint.imports,
            exports: blueprint.exports.into_iter().collect(),
            controllers: blueprint.controllers,
            controller_instances: HashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ModuleState) {
        debug!(module = %self.name, from = %self.state, to = %state, "Module state change");
        self.state = state;
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn imports(&self) -> &[ProviderToken] {
        &self.imports
    }

    pub fn declares(&self, token: &ProviderToken) -> bool {
        self.declarations.contains_key(token)
    }

    /// Whether another module may import `token` from here.
    pub fn is_exported(&self, token: &ProviderToken) -> bool {
        self.declares(token) && (self.root || self.exports.contains(token))
    }

    /// Tokens this module offers to others.
    pub fn exported_tokens(&self) -> Vec<ProviderToken> {
        self.declaration_order
            .iter()
            .filter(|token| self.is_exported(token))
            .cloned()
            .collect()
    }

    /// Export declarations that name nothing this module declares.
    pub fn dangling_exports(&self) -> Vec<ProviderToken> {
        self.exports
            .iter()
            .filter(|token| !self.declares(token))
            .cloned()
            .collect()
    }

    /// Dependencies of providers and controllers not declared in this module.
    pub fn external_requirements(&self) -> Vec<ProviderToken> {
        let provider_deps = self
            .declaration_order
            .iter()
            .filter_map(|token| self.declarations.get(token))
            .flat_map(ProviderDescriptor::dependencies);
        let controller_deps = self
            .controllers
            .iter()
            .flat_map(|controller| controller.dependencies.iter().cloned());

        let mut seen = HashSet::new();
        provider_deps
            .chain(controller_deps)
            .map(|dep| dep.token)
            .filter(|token| !self.declares(token))
            .filter(|token| seen.insert(token.clone()))
            .collect()
    }

    /// Splice an inferred import into the import list.
    pub(crate) fn add_import(&mut self, token: ProviderToken) -> bool {
        if self.imports.contains(&token) {
            return false;
        }
        debug!(module = %self.name, provider = %token, "Import inferred from global exports");
        self.imports.push(token);
        true
    }

    /// Register every declared provider, in declaration order.
    pub(crate) fn register_all(&mut self, ctx: &mut ResolveContext<'_>) -> Result<()> {
        for token in self.declaration_order.clone() {
            if let Some(descriptor) = self.declarations.get(&token).cloned() {
                self.register_provider(descriptor, ctx)?;
            }
        }
        Ok(())
    }

    /// Register a provider declaration.
    ///
    /// Registering a token that is already registered is a no-op.
    pub(crate) fn register_provider(
        &mut self,
        descriptor: ProviderDescriptor,
        ctx: &mut ResolveContext<'_>,
    ) -> Result<()> {
        descriptor.validate()?;
        let token = descriptor.token().clone();
        if !self.declarations.contains_key(&token) {
            self.declaration_order.push(token.clone());
            self.declarations.insert(token.clone(), descriptor);
        }
        self.ensure_registered(&token, ctx)
    }

    fn ensure_registered(&mut self, token: &ProviderToken, ctx: &mut ResolveContext<'_>) -> Result<()> {
        if self.providers.contains_key(token) {
            trace!(module = %self.name, provider = %token, "Provider already registered");
            return Ok(());
        }
        let Some(descriptor) = self.declarations.get(token).cloned() else {
            return Err(TrellisError::Internal(format!(
                "'{token}' is not declared in module '{}'",
                self.name
            )));
        };
        debug!(module = %self.name, provider = %token, kind = %descriptor.kind(), "Registering provider");
        self.order.push(token.clone());
        self.providers.insert(token.clone(), ProviderRecord::new(descriptor));
        self.try_resolve(token, ctx).map(|_| ())
    }

    /// Re-run resolution for a registered provider.
    pub(crate) fn update_provider(&mut self, token: &ProviderToken, ctx: &mut ResolveContext<'_>) -> Result<bool> {
        self.try_resolve(token, ctx)
    }

    fn try_resolve(&mut self, token: &ProviderToken, ctx: &mut ResolveContext<'_>) -> Result<bool> {
        let Some(record) = self.providers.get(token) else {
            return Ok(false);
        };
        if record.resolved {
            return Ok(true);
        }
        if record.pending {
            return Ok(false);
        }

        if let Some(position) = ctx.stack.iter().position(|t| t == token) {
            let mut cycle: Vec<&str> = ctx.stack[position..].iter().map(ProviderToken::as_str).collect();
            cycle.push(token.as_str());
            return Err(TrellisError::CircularDependency {
                cycle: cycle.join(" -> "),
            });
        }

        let descriptor = record.descriptor.clone();
        let dependencies = record.dependencies.clone();

        ctx.stack.push(token.clone());
        let collected = self.get_provider_params(token, &dependencies, ctx);
        ctx.stack.pop();

        let values = match collected? {
            Collected::Ready(values) => values,
            Collected::Waiting(missing) => {
                trace!(module = %self.name, provider = %token, ?missing, "Provider deferred");
                if let Some(record) = self.providers.get_mut(token) {
                    record.missing = missing;
                }
                return Ok(false);
            }
        };

        let args = Args::new(token.clone(), values);
        let instance = match &descriptor {
            ProviderDescriptor::Class(class) => class.construct(&args)?,
            ProviderDescriptor::Instance(instance) => instance.instance.clone(),
            ProviderDescriptor::Value(value) => value.value.clone(),
            ProviderDescriptor::Alias(alias) => args.raw(0).cloned().ok_or_else(|| {
                TrellisError::invalid_provider(token.as_str(), format!("alias target '{}' is missing", alias.target))
            })?,
            ProviderDescriptor::Factory(factory) => match factory.invoke(args) {
                FactoryOutput::Ready(outcome) => outcome?,
                FactoryOutput::Pending(computation) => {
                    ctx.pending.enqueue(self.id, token.clone(), computation);
                    if let Some(record) = self.providers.get_mut(token) {
                        record.pending = true;
                        record.missing.clear();
                    }
                    return Ok(false);
                }
            },
        };

        if let Some(record) = self.providers.get_mut(token) {
            record.settle(instance);
        }
        debug!(module = %self.name, provider = %token, "Provider resolved");
        Ok(true)
    }

    /// Build the ordered argument list for `requester`.
    ///
    /// Each dependency is looked up in this module's resolved providers, then
    /// in its raw declarations (registering them on the way), then in its
    /// imports.
    fn get_provider_params(
        &mut self,
        requester: &ProviderToken,
        dependencies: &[Dependency],
        ctx: &mut ResolveContext<'_>,
    ) -> Result<Collected> {
        let mut values = Vec::with_capacity(dependencies.len());
        let mut missing = Vec::new();

        for dep in dependencies {
            match self.lookup(dep, ctx)? {
                Lookup::Found(instance) => values.push(Some(instance)),
                Lookup::Waiting => missing.push(dep.token.to_string()),
                Lookup::Absent if !ctx.strict => missing.push(dep.token.to_string()),
                Lookup::Absent if dep.optional => values.push(None),
                Lookup::Absent => {
                    return Err(TrellisError::DependencyNotFound {
                        dependency: dep.token.to_string(),
                        index: dep.index,
                        requester: requester.to_string(),
                        module: self.name.clone(),
                    });
                }
            }
        }

        if missing.is_empty() {
            Ok(Collected::Ready(values))
        } else {
            Ok(Collected::Waiting(missing))
        }
    }

    fn lookup(&mut self, dep: &Dependency, ctx: &mut ResolveContext<'_>) -> Result<Lookup> {
        let token = &dep.token;

        if let Some(record) = self.providers.get(token) {
            if let Some(instance) = &record.instance {
                return Ok(Lookup::Found(instance.clone()));
            }
            return Ok(if self.try_resolve(token, ctx)? {
                self.local_instance(token).map_or(Lookup::Waiting, Lookup::Found)
            } else {
                Lookup::Waiting
            });
        }

        if self.declarations.contains_key(token) {
            self.ensure_registered(token, ctx)?;
            return Ok(self.local_instance(token).map_or(Lookup::Waiting, Lookup::Found));
        }

        Ok(self.lookup_import(token, ctx.exports))
    }

    fn lookup_import(&self, token: &ProviderToken, exports: &ExportIndex) -> Lookup {
        if !self.imports.contains(token) {
            return Lookup::Absent;
        }
        match exports.get(token) {
            Some(entry) if entry.module != self.id => match &entry.instance {
                Some(instance) => Lookup::Found(instance.clone()),
                None => Lookup::Waiting,
            },
            _ => Lookup::Absent,
        }
    }

    fn local_instance(&self, token: &ProviderToken) -> Option<Instance> {
        self.providers.get(token).and_then(|record| record.instance.clone())
    }

    /// Store the outcome of a pending factory.
    pub(crate) fn complete_factory(&mut self, token: &ProviderToken, outcome: Result<Instance>) -> Result<()> {
        let instance = outcome?;
        match self.providers.get_mut(token) {
            Some(record) => {
                record.settle(instance);
                debug!(module = %self.name, provider = %token, "Factory provider resolved");
                Ok(())
            }
            None => Err(TrellisError::Internal(format!(
                "factory result for unknown provider '{token}' in module '{}'",
                self.name
            ))),
        }
    }

    /// Instantiate the module's controllers. Every provider must be resolved.
    pub(crate) fn finish_initialization(&mut self, exports: &ExportIndex) -> Result<()> {
        if let Some(token) = self.order.iter().find(|token| !self.is_resolved(token)) {
            return Err(TrellisError::ModuleRegistrationFailed {
                message: format!(
                    "module '{}' cannot finish initialization, '{token}' is unresolved",
                    self.name
                ),
            });
        }

        for controller in self.controllers.clone() {
            let mut values = Vec::with_capacity(controller.dependencies.len());
            for dep in &controller.dependencies {
                let found = self
                    .local_instance(&dep.token)
                    .or_else(|| match self.lookup_import(&dep.token, exports) {
                        Lookup::Found(instance) => Some(instance),
                        Lookup::Absent | Lookup::Waiting => None,
                    });
                match found {
                    Some(instance) => values.push(Some(instance)),
                    None if dep.optional => values.push(None),
                    None => {
                        return Err(TrellisError::DependencyNotFound {
                            dependency: dep.token.to_string(),
                            index: dep.index,
                            requester: controller.token.to_string(),
                            module: self.name.clone(),
                        });
                    }
                }
            }
            let instance = controller
                .construct(&Args::new(controller.token.clone(), values))
                .map_err(|e| TrellisError::ControllerResolution {
                    controller: controller.token.to_string(),
                    reason: e.to_string(),
                })?;
            debug!(module = %self.name, controller = %controller.token, "Controller instantiated");
            self.controller_instances.insert(controller.token.clone(), instance);
        }

        self.set_state(ModuleState::Ready);
        Ok(())
    }

    pub fn is_resolved(&self, token: &ProviderToken) -> bool {
        self.providers.get(token).is_some_and(|record| record.resolved)
    }

    pub fn is_pending(&self, token: &ProviderToken) -> bool {
        self.providers.get(token).is_some_and(|record| record.pending)
    }

    /// Resolved instance of a provider this module can see.
    pub fn get_provider(&self, token: &ProviderToken, exports: &ExportIndex) -> Option<Instance> {
        self.local_instance(token).or_else(|| match self.lookup_import(token, exports) {
            Lookup::Found(instance) => Some(instance),
            Lookup::Absent | Lookup::Waiting => None,
        })
    }

    pub fn provider(&self, token: &ProviderToken) -> Option<&ProviderRecord> {
        self.providers.get(token)
    }

    /// Registered providers, in registration order.
    pub fn providers(&self) -> impl Iterator<Item = &ProviderRecord> {
        self.order.iter().filter_map(|token| self.providers.get(token))
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &ProviderRecord> {
        self.providers().filter(|record| !record.resolved)
    }

    pub fn controller(&self, token: &ProviderToken) -> Option<&Instance> {
        self.controller_instances.get(token)
    }

    pub fn controllers(&self) -> &[ClassDescriptor] {
        &self.controllers
    }
}
