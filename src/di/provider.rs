use super::token::{Dependency, ProviderToken};
use crate::error::{Result, TrellisError};
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use strum_macros::Display;

/// A resolved provider value.
pub type Instance = Arc<dyn Any + Send + Sync>;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type Constructor = Arc<dyn Fn(&Args) -> Result<Instance> + Send + Sync>;
type FactoryFn = Arc<dyn Fn(Args) -> FactoryOutput + Send + Sync>;

/// Constructor arguments, in dependency index order.
///
/// Optional dependencies that could not be found are `None`.
#[derive(Clone)]
pub struct Args {
    requester: ProviderToken,
    values: Vec<Option<Instance>>,
}

impl Args {
    pub(crate) fn new(requester: ProviderToken, values: Vec<Option<Instance>>) -> Self {
        Self { requester, values }
    }

    pub fn empty(requester: ProviderToken) -> Self {
        Self::new(requester, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn raw(&self, index: usize) -> Option<&Instance> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Required argument `index` as `Arc<T>`.
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>> {
        self.optional(index)?.ok_or_else(|| {
            TrellisError::Internal(format!(
                "argument [{index}] of '{}' was not provided",
                self.requester
            ))
        })
    }

    /// Optional argument `index` as `Arc<T>`; `Ok(None)` when it was not found.
    pub fn optional<T: Send + Sync + 'static>(&self, index: usize) -> Result<Option<Arc<T>>> {
        self.raw(index)
            .map(|instance| {
                Arc::clone(instance)
                    .downcast::<T>()
                    .map_err(|_| TrellisError::DowncastFailed {
                        type_name: std::any::type_name::<T>().to_string(),
                    })
            })
            .transpose()
    }

    /// Argument `index` registered through [`Provider::bind`], as `Arc<dyn Trait>`.
    pub fn get_trait<T: ?Sized + Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>> {
        let wrapper = self.get::<Arc<T>>(index)?;
        Ok(wrapper.as_ref().clone())
    }
}

/// Types the container can build.
///
/// Implementing this trait is what marks a type as injectable. The
/// dependency list drives resolution order; `inject` receives the resolved
/// arguments in the same order.
///
/// ```
/// use std::sync::Arc;
/// use trellis::di::{Args, Dependencies, Dependency, Injectable};
///
/// struct Database;
/// impl Injectable for Database {
///     fn inject(_: &Args) -> trellis::Result<Self> {
///         Ok(Database)
///     }
/// }
///
/// struct UserService {
///     db: Arc<Database>,
/// }
///
/// impl Injectable for UserService {
///     fn dependencies() -> Vec<Dependency> {
///         Dependencies::new().class::<Database>().build()
///     }
///
///     fn inject(args: &Args) -> trellis::Result<Self> {
///         Ok(UserService { db: args.get(0)? })
///     }
/// }
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    fn inject(args: &Args) -> Result<Self>;

    /// Runs once, right after construction.
    fn on_ready(&self) -> Result<()> {
        Ok(())
    }
}

/// What a factory hands back: a value now, or a computation to await.
pub enum FactoryOutput {
    Ready(Result<Instance>),
    Pending(BoxFuture<Result<Instance>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProviderKind {
    Class,
    CustomClass,
    Instance,
    Factory,
    Value,
    Alias,
}

#[derive(Clone)]
pub struct ClassDescriptor {
    pub token: ProviderToken,
    pub type_name: &'static str,
    pub dependencies: Vec<Dependency>,
    construct: Constructor,
    custom: bool,
}

impl ClassDescriptor {
    pub fn of<T: Injectable>() -> Self {
        Self::with_token::<T>(ProviderToken::of::<T>(), false)
    }

    fn with_token<T: Injectable>(token: ProviderToken, custom: bool) -> Self {
        ClassDescriptor {
            token,
            type_name: std::any::type_name::<T>(),
            dependencies: T::dependencies(),
            construct: Arc::new(|args: &Args| {
                let value = T::inject(args)?;
                value.on_ready()?;
                Ok(Arc::new(value) as Instance)
            }),
            custom,
        }
    }

    pub(crate) fn construct(&self, args: &Args) -> Result<Instance> {
        (self.construct)(args)
    }
}

#[derive(Clone)]
pub struct InstanceDescriptor {
    pub token: ProviderToken,
    pub instance: Instance,
}

#[derive(Clone)]
pub struct FactoryDescriptor {
    pub token: ProviderToken,
    pub inject: Vec<Dependency>,
    factory: FactoryFn,
}

impl FactoryDescriptor {
    pub(crate) fn invoke(&self, args: Args) -> FactoryOutput {
        (self.factory)(args)
    }
}

#[derive(Clone)]
pub struct ValueDescriptor {
    pub token: ProviderToken,
    pub value: Instance,
}

#[derive(Clone)]
pub struct AliasDescriptor {
    pub token: ProviderToken,
    pub target: ProviderToken,
}

/// A provider declaration, decided once at registration time.
#[derive(Clone)]
pub enum ProviderDescriptor {
    Class(ClassDescriptor),
    Instance(InstanceDescriptor),
    Factory(FactoryDescriptor),
    Value(ValueDescriptor),
    Alias(AliasDescriptor),
}

impl ProviderDescriptor {
    pub fn token(&self) -> &ProviderToken {
        match self {
            ProviderDescriptor::Class(d) => &d.token,
            ProviderDescriptor::Instance(d) => &d.token,
            ProviderDescriptor::Factory(d) => &d.token,
            ProviderDescriptor::Value(d) => &d.token,
            ProviderDescriptor::Alias(d) => &d.token,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderDescriptor::Class(d) if d.custom => ProviderKind::CustomClass,
            ProviderDescriptor::Class(_) => ProviderKind::Class,
            ProviderDescriptor::Instance(_) => ProviderKind::Instance,
            ProviderDescriptor::Factory(_) => ProviderKind::Factory,
            ProviderDescriptor::Value(_) => ProviderKind::Value,
            ProviderDescriptor::Alias(_) => ProviderKind::Alias,
        }
    }

    pub fn dependencies(&self) -> Vec<Dependency> {
        match self {
            ProviderDescriptor::Class(d) => d.dependencies.clone(),
            ProviderDescriptor::Factory(d) => d.inject.clone(),
            ProviderDescriptor::Alias(d) => vec![Dependency::token(d.target.clone(), 0)],
            ProviderDescriptor::Instance(_) | ProviderDescriptor::Value(_) => Vec::new(),
        }
    }

    /// Reject declarations that can never resolve.
    pub fn validate(&self) -> Result<()> {
        let token = self.token();
        if token.as_str().is_empty() {
            return Err(TrellisError::invalid_provider("<empty>", "token must not be empty"));
        }
        if let ProviderDescriptor::Alias(alias) = self {
            if alias.target == alias.token {
                return Err(TrellisError::invalid_provider(
                    token.as_str(),
                    "alias points to itself",
                ));
            }
        }
        if self.dependencies().iter().any(|dep| &dep.token == token) {
            return Err(TrellisError::invalid_provider(
                token.as_str(),
                "provider depends on itself",
            ));
        }
        for (position, dep) in self.dependencies().iter().enumerate() {
            if dep.index != position {
                return Err(TrellisError::invalid_provider(
                    token.as_str(),
                    format!(
                        "dependency '{}' declares index {} at position {position}",
                        dep.token, dep.index
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Constructors for [`ProviderDescriptor`]s.
pub struct Provider;

impl Provider {
    /// An injectable type registered under its own type token.
    pub fn class<T: Injectable>() -> ProviderDescriptor {
        ProviderDescriptor::Class(ClassDescriptor::of::<T>())
    }

    /// An injectable type registered under another token (`useClass`).
    pub fn use_class<T: Injectable>(token: impl Into<ProviderToken>) -> ProviderDescriptor {
        ProviderDescriptor::Class(ClassDescriptor::with_token::<T>(token.into(), true))
    }

    /// An object that is already built, registered under its type token.
    pub fn instance<T: Send + Sync + 'static>(value: T) -> ProviderDescriptor {
        Self::instance_arc(Arc::new(value))
    }

    pub fn instance_arc<T: Send + Sync + 'static>(value: Arc<T>) -> ProviderDescriptor {
        ProviderDescriptor::Instance(InstanceDescriptor {
            token: ProviderToken::of::<T>(),
            instance: value,
        })
    }

    /// A literal value under an explicit token (`useValue`).
    pub fn value<T: Send + Sync + 'static>(
        token: impl Into<ProviderToken>,
        value: T,
    ) -> ProviderDescriptor {
        ProviderDescriptor::Value(ValueDescriptor {
            token: token.into(),
            value: Arc::new(value),
        })
    }

    /// A factory that may return a pending computation (`useFactory`).
    pub fn factory<F>(
        token: impl Into<ProviderToken>,
        inject: Vec<Dependency>,
        factory: F,
    ) -> ProviderDescriptor
    where
        F: Fn(Args) -> FactoryOutput + Send + Sync + 'static,
    {
        ProviderDescriptor::Factory(FactoryDescriptor {
            token: token.into(),
            inject,
            factory: Arc::new(factory),
        })
    }

    /// A factory that builds its value synchronously.
    pub fn factory_sync<T, F>(
        token: impl Into<ProviderToken>,
        inject: Vec<Dependency>,
        factory: F,
    ) -> ProviderDescriptor
    where
        T: Send + Sync + 'static,
        F: Fn(&Args) -> Result<T> + Send + Sync + 'static,
    {
        Self::factory(token, inject, move |args| {
            FactoryOutput::Ready(factory(&args).map(|value| Arc::new(value) as Instance))
        })
    }

    /// A factory whose value is produced by a future.
    pub fn factory_async<T, F, Fut>(
        token: impl Into<ProviderToken>,
        inject: Vec<Dependency>,
        factory: F,
    ) -> ProviderDescriptor
    where
        T: Send + Sync + 'static,
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::factory(token, inject, move |args| {
            let pending = factory(args);
            FactoryOutput::Pending(Box::pin(async move {
                pending.await.map(|value| Arc::new(value) as Instance)
            }))
        })
    }

    /// Another name for an existing provider (`useExisting`).
    pub fn alias(
        token: impl Into<ProviderToken>,
        target: impl Into<ProviderToken>,
    ) -> ProviderDescriptor {
        ProviderDescriptor::Alias(AliasDescriptor {
            token: token.into(),
            target: target.into(),
        })
    }

    /// Expose `Impl` as `Arc<dyn Trait>` under the trait's type token.
    ///
    /// Consumers read it back with [`Args::get_trait`].
    pub fn bind<Trait, Impl, F>(caster: F) -> ProviderDescriptor
    where
        Trait: ?Sized + Send + Sync + 'static,
        Impl: Send + Sync + 'static,
        F: Fn(Arc<Impl>) -> Arc<Trait> + Send + Sync + 'static,
    {
        let inject = vec![Dependency::class::<Impl>(0)];
        Self::factory_sync(ProviderToken::of::<Trait>(), inject, move |args| {
            Ok(caster(args.get::<Impl>(0)?))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::Dependencies;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static READY_CALLS: AtomicUsize = AtomicUsize::new(0);

    struct Clock;

    impl Injectable for Clock {
        fn inject(_: &Args) -> Result<Self> {
            Ok(Clock)
        }

        fn on_ready(&self) -> Result<()> {
            READY_CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn test_class_construct_runs_on_ready_once() {
        let ProviderDescriptor::Class(class) = Provider::class::<Clock>() else {
            panic!("expected class descriptor");
        };
        let before = READY_CALLS.load(Ordering::SeqCst);
        let instance = class.construct(&Args::empty(class.token.clone())).unwrap();
        assert!(instance.downcast::<Clock>().is_ok());
        assert_eq!(READY_CALLS.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Provider::class::<Clock>().kind(), ProviderKind::Class);
        assert_eq!(Provider::use_class::<Clock>("CLOCK").kind(), ProviderKind::CustomClass);
        assert_eq!(Provider::value("N", 1u8).kind(), ProviderKind::Value);
        assert_eq!(Provider::alias("A", "B").kind(), ProviderKind::Alias);
        assert_eq!(Provider::instance(Clock).kind(), ProviderKind::Instance);
    }

    #[test]
    fn test_alias_depends_on_target() {
        let alias = Provider::alias("Logger", "ConsoleLogger");
        let deps = alias.dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].token.as_str(), "ConsoleLogger");
    }

    #[test]
    fn test_validate_rejects_self_alias() {
        let err = Provider::alias("A", "A").validate().unwrap_err();
        assert!(matches!(err, TrellisError::InvalidProvider { .. }));
    }

    #[test]
    fn test_validate_rejects_self_dependency() {
        let factory = Provider::factory_sync("A", Dependencies::new().token("A").build(), |_| Ok(1u8));
        assert!(factory.validate().is_err());
    }

    #[test]
    fn test_args_downcast() {
        let args = Args::new(
            ProviderToken::named("consumer"),
            vec![Some(Arc::new(7u32) as Instance), None],
        );
        assert_eq!(*args.get::<u32>(0).unwrap(), 7);
        assert!(matches!(
            args.get::<String>(0),
            Err(TrellisError::DowncastFailed { .. })
        ));
        assert!(args.optional::<u32>(1).unwrap().is_none());
        assert!(args.get::<u32>(1).is_err());
    }

    #[test]
    fn test_bind_trait() {
        let ProviderDescriptor::Factory(factory) =
            Provider::bind::<dyn Greeter, English, _>(|english| english as Arc<dyn Greeter>)
        else {
            panic!("expected factory descriptor");
        };
        assert_eq!(factory.token, ProviderToken::of::<dyn Greeter>());
        let args = Args::new(factory.token.clone(), vec![Some(Arc::new(English) as Instance)]);
        let FactoryOutput::Ready(Ok(instance)) = factory.invoke(args) else {
            panic!("expected a ready value");
        };
        let consumer = Args::new(ProviderToken::named("consumer"), vec![Some(instance)]);
        assert_eq!(consumer.get_trait::<dyn Greeter>(0).unwrap().greet(), "hello");
    }
}
