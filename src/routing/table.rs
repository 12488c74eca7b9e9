use super::method::HttpMethod;
use super::schema::{compile_path, normalize_path, CompiledPath, PathSegment, RoutePath};
use crate::error::{Result, TrellisError};
use regex::Regex;
use std::collections::HashMap;
use strum_macros::Display;
use tracing::{debug, warn};

/// Priority class of a compiled route. Buckets are scanned in declaration
/// order of the variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum RouteBucket {
    Absolute,
    Dynamic,
    DynamicRegex,
    Optional,
}

impl RouteBucket {
    pub(crate) const ALL: [RouteBucket; 4] = [
        RouteBucket::Absolute,
        RouteBucket::Dynamic,
        RouteBucket::DynamicRegex,
        RouteBucket::Optional,
    ];

    fn classify(path: &CompiledPath) -> Self {
        if path.is_absolute() {
            RouteBucket::Absolute
        } else if path.has_optional() {
            RouteBucket::Optional
        } else if path.has_regex() {
            RouteBucket::DynamicRegex
        } else {
            RouteBucket::Dynamic
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// One registered `(method, path)` binding.
#[derive(Debug, Clone)]
pub struct CompiledRoute<H> {
    pub method: HttpMethod,
    /// Canonical path, `regex:<source>` for raw patterns.
    pub path: String,
    pub segments: Vec<PathSegment>,
    pub is_absolute: bool,
    pub has_optional: bool,
    pub match_pattern: Regex,
    pub handler_name: String,
    pub handler: H,
    pub(crate) captures: Vec<(String, String)>,
    pub(crate) raw: bool,
    absolute_keys: Vec<String>,
    bucket: RouteBucket,
}

impl<H> CompiledRoute<H> {
    /// Compile `path` and bind it to `handler`.
    pub fn compile(
        method: HttpMethod,
        path: &RoutePath,
        handler_name: impl Into<String>,
        handler: H,
    ) -> Result<Self> {
        let compiled = compile_path(path)?;
        Ok(Self::from_compiled(method, compiled, handler_name.into(), handler))
    }

    fn from_compiled(
        method: HttpMethod,
        compiled: CompiledPath,
        handler_name: String,
        handler: H,
    ) -> Self {
        Self {
            method,
            bucket: RouteBucket::classify(&compiled),
            absolute_keys: compiled.absolute_keys(),
            is_absolute: compiled.is_absolute(),
            has_optional: compiled.has_optional(),
            path: compiled.canonical,
            segments: compiled.segments,
            match_pattern: compiled.match_pattern,
            handler_name,
            handler,
            captures: compiled.captures,
            raw: compiled.raw,
        }
    }

    pub fn bucket(&self) -> RouteBucket {
        self.bucket
    }

    /// Whether this route can be tried against a request with
    /// `component_count` path components.
    pub(crate) fn accepts_length(&self, component_count: usize) -> bool {
        self.has_optional || self.raw || self.segments.len() == component_count
    }
}

type RouteKey = (HttpMethod, String);

/// Ordered collection of compiled routes for one controller.
///
/// Routes are partitioned into four [`RouteBucket`]s and iterated
/// absolute → dynamic → dynamic-regex → optional. Inside a bucket the
/// registration order is kept.
#[derive(Debug, Clone)]
pub struct RouteTable<H> {
    buckets: [Vec<CompiledRoute<H>>; 4],
    /// Every route registered under a canonical `(method, path)`.
    keys: HashMap<RouteKey, Vec<(RouteBucket, usize)>>,
    /// Concrete path of an absolute route to its index in the absolute bucket.
    absolute: HashMap<RouteKey, usize>,
}

impl<H> Default for RouteTable<H> {
    fn default() -> Self {
        Self {
            buckets: [Vec::new(), Vec::new(), Vec::new(), Vec::new()],
            keys: HashMap::new(),
            absolute: HashMap::new(),
        }
    }
}

impl<H> RouteTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a compiled route.
    ///
    /// Returns `Ok(false)` when the same handler is already bound to the same
    /// `(method, path)`. A different handler on the same key is a conflict
    /// unless the route has optional segments, in which case both are kept and
    /// the later one wins at match time.
    pub fn add_route(&mut self, route: CompiledRoute<H>) -> Result<bool> {
        let key = (route.method, route.path.clone());
        let registered = self.keys.get(&key).map(Vec::as_slice).unwrap_or_default();

        if registered
            .iter()
            .any(|&(bucket, index)| self.buckets[bucket.slot()][index].handler_name == route.handler_name)
        {
            debug!(
                method = %route.method,
                path = %route.path,
                handler = %route.handler_name,
                "Route already registered, skipping"
            );
            return Ok(false);
        }
        if let Some(&(bucket, index)) = registered.last() {
            let existing = &self.buckets[bucket.slot()][index];
            if !route.has_optional {
                return Err(TrellisError::RouteConflict {
                    method: route.method.to_string(),
                    path: route.path,
                    existing: existing.handler_name.clone(),
                    incoming: route.handler_name,
                });
            }
            warn!(
                method = %route.method,
                path = %route.path,
                existing = %existing.handler_name,
                incoming = %route.handler_name,
                "Optional route registered twice; the later handler takes precedence"
            );
        }

        let bucket = route.bucket();
        let index = self.buckets[bucket.slot()].len();
        if bucket == RouteBucket::Absolute {
            self.index_absolute(&route, index);
        }
        debug!(
            method = %route.method,
            path = %route.path,
            handler = %route.handler_name,
            bucket = %bucket,
            "Route registered"
        );
        self.buckets[bucket.slot()].push(route);
        self.keys.entry(key).or_default().push((bucket, index));
        Ok(true)
    }

    /// A required route keeps its concrete path; an optional expansion only
    /// takes a path no required route owns, later expansions replacing
    /// earlier ones.
    fn index_absolute(&mut self, route: &CompiledRoute<H>, index: usize) {
        for path in &route.absolute_keys {
            let key = (route.method, path.clone());
            let owned_by_required = self
                .absolute
                .get(&key)
                .is_some_and(|&current| !self.buckets[RouteBucket::Absolute.slot()][current].has_optional);
            if route.has_optional && owned_by_required {
                continue;
            }
            self.absolute.insert(key, index);
        }
    }

    /// Compile and add in one step.
    pub fn add(
        &mut self,
        method: HttpMethod,
        path: impl Into<RoutePath>,
        handler_name: impl Into<String>,
        handler: H,
    ) -> Result<bool> {
        let route = CompiledRoute::compile(method, &path.into(), handler_name, handler)?;
        self.add_route(route)
    }

    /// Exact lookup among absolute routes.
    ///
    /// `full_path` is normalized first, so `/users`, `users/` and `/users/`
    /// all hit the same entry. A route registered for [`HttpMethod::All`] is
    /// used when no method-specific one exists.
    pub fn get_absolute_or_null(&self, full_path: &str, method: HttpMethod) -> Option<&CompiledRoute<H>> {
        let path = normalize_path(full_path);
        [method, HttpMethod::All]
            .into_iter()
            .find_map(|candidate| self.absolute.get(&(candidate, path.clone())))
            .map(|&index| &self.buckets[RouteBucket::Absolute.slot()][index])
    }

    /// Routes in matching order.
    pub fn iter(&self) -> impl Iterator<Item = &CompiledRoute<H>> {
        RouteBucket::ALL
            .into_iter()
            .flat_map(move |bucket| self.buckets[bucket.slot()].iter())
    }

    /// Routes of one bucket, in registration order.
    pub fn bucket(&self, bucket: RouteBucket) -> &[CompiledRoute<H>] {
        &self.buckets[bucket.slot()]
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(routes: &[(HttpMethod, &str, &str)]) -> RouteTable<()> {
        let mut table = RouteTable::new();
        for (method, path, handler) in routes {
            table.add(*method, *path, *handler, ()).unwrap();
        }
        table
    }

    #[test]
    fn test_bucket_order() {
        let table = table(&[
            (HttpMethod::Get, "/users/:id?", "optional"),
            (HttpMethod::Get, "/users/:id(num)", "regex"),
            (HttpMethod::Get, "/users/:id", "dynamic"),
            (HttpMethod::Get, "/users/me", "absolute"),
        ]);
        let order: Vec<_> = table.iter().map(|r| r.handler_name.as_str()).collect();
        assert_eq!(order, vec!["absolute", "dynamic", "regex", "optional"]);
        assert_eq!(table.bucket(RouteBucket::Dynamic).len(), 1);
    }

    #[test]
    fn test_identical_registration_is_noop() {
        let mut table = RouteTable::new();
        assert!(table.add(HttpMethod::Get, "/health", "check", ()).unwrap());
        assert!(!table.add(HttpMethod::Get, "/health/", "check", ()).unwrap());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_conflicting_registration_is_rejected() {
        let mut table = RouteTable::new();
        table.add(HttpMethod::Get, "/health", "check", ()).unwrap();
        let err = table.add(HttpMethod::Get, "/health", "other", ()).unwrap_err();
        assert!(matches!(err, TrellisError::RouteConflict { .. }));

        // another method on the same path is fine
        assert!(table.add(HttpMethod::Post, "/health", "other", ()).unwrap());
    }

    #[test]
    fn test_optional_duplicates_are_kept() {
        let mut table = RouteTable::new();
        table.add(HttpMethod::Get, "/register/:user?", "first", ()).unwrap();
        assert!(table.add(HttpMethod::Get, "/register/:user?", "second", ()).unwrap());
        assert_eq!(table.bucket(RouteBucket::Optional).len(), 2);
    }

    #[test]
    fn test_repeated_optional_handler_is_noop() {
        let mut table = RouteTable::new();
        table.add(HttpMethod::Get, "/register/:user?", "first", ()).unwrap();
        table.add(HttpMethod::Get, "/register/:user?", "second", ()).unwrap();
        assert!(!table.add(HttpMethod::Get, "/register/:user?", "first", ()).unwrap());
        assert_eq!(table.bucket(RouteBucket::Optional).len(), 2);
    }

    #[test]
    fn test_optional_static_route_is_found_by_both_paths() {
        let table = table(&[
            (HttpMethod::Get, "/help/about?", "about"),
            (HttpMethod::Get, "/help/:topic", "topic"),
        ]);
        assert_eq!(table.bucket(RouteBucket::Absolute).len(), 1);
        for path in ["/help", "/help/about"] {
            let route = table.get_absolute_or_null(path, HttpMethod::Get).unwrap();
            assert_eq!(route.handler_name, "about", "{path}");
        }
        assert!(table.get_absolute_or_null("/help/about?", HttpMethod::Get).is_none());
    }

    #[test]
    fn test_required_absolute_keeps_its_path_over_optional_expansion() {
        let table = table(&[
            (HttpMethod::Get, "/help", "index"),
            (HttpMethod::Get, "/help/about?", "about"),
        ]);
        assert_eq!(table.get_absolute_or_null("/help", HttpMethod::Get).unwrap().handler_name, "index");
        assert_eq!(
            table.get_absolute_or_null("/help/about", HttpMethod::Get).unwrap().handler_name,
            "about"
        );
    }

    #[test]
    fn test_absolute_lookup_normalizes_slashes() {
        let table = table(&[(HttpMethod::Get, "/users/list", "list")]);
        for path in ["/users/list", "users/list", "/users/list/"] {
            let route = table.get_absolute_or_null(path, HttpMethod::Get).unwrap();
            assert_eq!(route.handler_name, "list");
        }
        assert!(table.get_absolute_or_null("/users/list", HttpMethod::Post).is_none());
    }

    #[test]
    fn test_absolute_lookup_falls_back_to_all() {
        let table = table(&[(HttpMethod::All, "/ping", "ping")]);
        assert!(table.get_absolute_or_null("/ping", HttpMethod::Delete).is_some());
    }

    #[test]
    fn test_absolute_lookup_ignores_dynamic_routes() {
        let table = table(&[(HttpMethod::Get, "/users/:id", "one")]);
        assert!(table.get_absolute_or_null("/users/:id", HttpMethod::Get).is_none());
    }
}
