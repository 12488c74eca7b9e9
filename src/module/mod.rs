use crate::controller::{ControllerBlueprint, ControllerDescriptor};
use crate::di::{Injectable, ModuleBlueprint, ProviderDescriptor, ProviderToken};

/// A type that declares a module.
///
/// # Example
/// ```
/// use trellis::di::{Args, Injectable, Provider};
/// use trellis::module::{Module, ModuleDefinition};
///
/// struct Clock;
/// impl Injectable for Clock {
///     fn inject(_: &Args) -> trellis::Result<Self> {
///         Ok(Clock)
///     }
/// }
///
/// struct TimeModule;
///
/// impl Module for TimeModule {
///     fn define() -> ModuleDefinition {
///         ModuleDefinition::new("TimeModule")
///             .provider(Provider::class::<Clock>())
///             .export_type::<Clock>()
///     }
/// }
///
/// assert_eq!(TimeModule::define().name(), "TimeModule");
/// ```
pub trait Module {
    fn define() -> ModuleDefinition;
}

/// Providers, controllers, imports and exports of one module.
#[derive(Clone, Default)]
pub struct ModuleDefinition {
    name: String,
    root: bool,
    imports: Vec<ProviderToken>,
    exports: Vec<ProviderToken>,
    providers: Vec<ProviderDescriptor>,
    controllers: Vec<ControllerBlueprint>,
}

impl ModuleDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Mark this module as the root module; all its providers are exported.
    pub fn root(mut self) -> Self {
        self.root = true;
        self
    }

    pub fn provider(mut self, provider: ProviderDescriptor) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(mut self, providers: impl IntoIterator<Item = ProviderDescriptor>) -> Self {
        self.providers.extend(providers);
        self
    }

    pub fn controller<C: Injectable>(mut self, controller: ControllerDescriptor<C>) -> Self {
        self.controllers.push(controller.into());
        self
    }

    pub fn import(mut self, token: impl Into<ProviderToken>) -> Self {
        self.imports.push(token.into());
        self
    }

    pub fn import_type<T: ?Sized + 'static>(self) -> Self {
        self.import(ProviderToken::of::<T>())
    }

    pub fn export(mut self, token: impl Into<ProviderToken>) -> Self {
        self.exports.push(token.into());
        self
    }

    pub fn export_type<T: ?Sized + 'static>(self) -> Self {
        self.export(ProviderToken::of::<T>())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn controllers(&self) -> &[ControllerBlueprint] {
        &self.controllers
    }

    /// Split into what the container resolves and the controllers to bind.
    pub(crate) fn into_parts(self) -> (ModuleBlueprint, Vec<ControllerBlueprint>) {
        let blueprint = ModuleBlueprint {
            name: self.name,
            root: self.root,
            imports: self.imports,
            exports: self.exports,
            providers: self.providers,
            controllers: self.controllers.iter().map(|c| c.class.clone()).collect(),
        };
        (blueprint, self.controllers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{Args, Provider};
    use crate::error::Result;

    struct Mailer;

    impl Injectable for Mailer {
        fn inject(_: &Args) -> Result<Self> {
            Ok(Mailer)
        }
    }

    struct MailController;

    impl Injectable for MailController {
        fn inject(_: &Args) -> Result<Self> {
            Ok(MailController)
        }
    }

    #[test]
    fn test_into_parts_carries_controller_classes() {
        let definition = ModuleDefinition::new("MailModule")
            .provider(Provider::class::<Mailer>())
            .controller(ControllerDescriptor::<MailController>::new("/mail"))
            .import("SMTP_HOST")
            .export_type::<Mailer>();

        let (blueprint, controllers) = definition.into_parts();
        assert_eq!(blueprint.name, "MailModule");
        assert_eq!(blueprint.imports, vec![ProviderToken::named("SMTP_HOST")]);
        assert_eq!(blueprint.exports, vec![ProviderToken::of::<Mailer>()]);
        assert_eq!(blueprint.controllers.len(), 1);
        assert_eq!(controllers[0].name, "MailController");
        assert_eq!(blueprint.controllers[0].token, *controllers[0].token());
    }
}
