//! Dependency injection.
//!
//! Providers are declared as [`ProviderDescriptor`]s, grouped per module in a
//! [`ModuleBlueprint`] and handed to a [`TransferRegistry`], which resolves
//! them across modules.

mod factory;
mod graph;
mod provider;
mod registry;
mod token;

pub use graph::{ExportEntry, ExportIndex, ModuleBlueprint, ModuleRecord, ModuleState, ProviderRecord};
pub use provider::{
    AliasDescriptor, Args, BoxFuture, ClassDescriptor, FactoryDescriptor, FactoryOutput, Injectable, Instance,
    InstanceDescriptor, Provider, ProviderDescriptor, ProviderKind, ValueDescriptor,
};
pub use registry::{ApplicationKey, FactoryPolling, RegistryState, TransferRegistry};
pub use token::{Dependencies, Dependency, DependencySource, ProviderToken};
