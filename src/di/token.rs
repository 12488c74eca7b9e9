use std::borrow::Borrow;
use std::fmt;

/// Key under which a provider is registered and looked up.
///
/// Type-backed tokens use [`std::any::type_name`]; explicit tokens are plain
/// strings such as `"DATABASE_URL"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderToken(String);

impl ProviderToken {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(std::any::type_name::<T>().to_string())
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ProviderToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderToken {
    fn from(value: &str) -> Self {
        Self::named(value)
    }
}

impl From<String> for ProviderToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// How a dependency was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencySource {
    /// By concrete type.
    Class,
    /// By explicit inject token.
    InjectToken,
}

/// One constructor parameter of a provider or controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub token: ProviderToken,
    pub index: usize,
    pub source: DependencySource,
    pub optional: bool,
}

impl Dependency {
    pub fn class<T: ?Sized + 'static>(index: usize) -> Self {
        Self {
            token: ProviderToken::of::<T>(),
            index,
            source: DependencySource::Class,
            optional: false,
        }
    }

    pub fn token(token: impl Into<ProviderToken>, index: usize) -> Self {
        Self {
            token: token.into(),
            index,
            source: DependencySource::InjectToken,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Builds a dependency list with indices assigned in declaration order.
///
/// ```
/// use trellis::di::Dependencies;
///
/// struct Database;
///
/// let deps = Dependencies::new()
///     .class::<Database>()
///     .token("CACHE_TTL")
///     .optional_token("METRICS")
///     .build();
/// assert_eq!(deps.len(), 3);
/// assert_eq!(deps[2].index, 2);
/// assert!(deps[2].optional);
/// ```
#[derive(Debug, Default, Clone)]
pub struct Dependencies(Vec<Dependency>);

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class<T: ?Sized + 'static>(mut self) -> Self {
        let index = self.0.len();
        self.0.push(Dependency::class::<T>(index));
        self
    }

    pub fn optional_class<T: ?Sized + 'static>(mut self) -> Self {
        let index = self.0.len();
        self.0.push(Dependency::class::<T>(index).optional());
        self
    }

    pub fn token(mut self, token: impl Into<ProviderToken>) -> Self {
        let index = self.0.len();
        self.0.push(Dependency::token(token, index));
        self
    }

    pub fn optional_token(mut self, token: impl Into<ProviderToken>) -> Self {
        let index = self.0.len();
        self.0.push(Dependency::token(token, index).optional());
        self
    }

    pub fn build(self) -> Vec<Dependency> {
        self.0
    }
}
