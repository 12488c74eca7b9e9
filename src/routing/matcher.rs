use super::method::HttpMethod;
use super::schema::{normalize_path, split_path};
use super::table::{CompiledRoute, RouteBucket, RouteTable};
use regex::Captures;
use std::collections::HashMap;
use tracing::trace;

/// A route selected for a request, with the parameters bound from the path.
#[derive(Debug)]
pub struct RouteMatch<'a, H> {
    pub route: &'a CompiledRoute<H>,
    pub params: HashMap<String, String>,
    /// Position of the owning table among those handed to the matcher.
    pub table: usize,
}

impl<H> RouteMatch<'_, H> {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Finds the route that serves a request among one or more [`RouteTable`]s.
///
/// Matching runs in three steps:
///
/// 1. exact lookup among the absolute routes of every table;
/// 2. a scan in bucket order, where the first non-optional hit wins; a bucket
///    is scanned in every table before the next bucket is tried;
/// 3. if only optional routes matched, the last one that matched wins.
pub struct RequestMatcher<'a, H> {
    tables: Vec<&'a RouteTable<H>>,
}

impl<'a, H> RequestMatcher<'a, H> {
    pub fn new(table: &'a RouteTable<H>) -> Self {
        Self { tables: vec![table] }
    }

    /// Match over several tables as if they were one, earlier tables first.
    pub fn across(tables: impl IntoIterator<Item = &'a RouteTable<H>>) -> Self {
        Self {
            tables: tables.into_iter().collect(),
        }
    }

    /// Match `request_path` (query string allowed) for `method`.
    ///
    /// Empty path components are dropped before matching. `None` is the
    /// not-found outcome; it is not an error.
    pub fn match_request(&self, request_path: &str, method: HttpMethod) -> Option<RouteMatch<'a, H>> {
        let path = normalize_path(strip_query(request_path));

        for (table, routes) in self.tables.iter().copied().enumerate() {
            if let Some(route) = routes.get_absolute_or_null(&path, method) {
                trace!(path = %path, handler = %route.handler_name, "Absolute route hit");
                return Some(RouteMatch {
                    route,
                    params: HashMap::new(),
                    table,
                });
            }
        }

        let component_count = split_path(&path).count();
        let mut optional_hit: Option<(&'a CompiledRoute<H>, Captures<'_>, usize)> = None;

        for bucket in RouteBucket::ALL {
            for (table, routes) in self.tables.iter().copied().enumerate() {
                for route in routes.bucket(bucket) {
                    if !route.method.accepts(method) || !route.accepts_length(component_count) {
                        continue;
                    }
                    let Some(captures) = route.match_pattern.captures(&path) else {
                        continue;
                    };
                    if !route.has_optional {
                        trace!(path = %path, handler = %route.handler_name, "Pattern route hit");
                        return Some(RouteMatch {
                            route,
                            params: bind_params(route, &captures),
                            table,
                        });
                    }
                    optional_hit = Some((route, captures, table));
                }
            }
        }

        optional_hit.map(|(route, captures, table)| {
            trace!(path = %path, handler = %route.handler_name, "Optional route hit");
            RouteMatch {
                route,
                params: bind_params(route, &captures),
                table,
            }
        })
    }
}

fn bind_params<H>(route: &CompiledRoute<H>, captures: &Captures<'_>) -> HashMap<String, String> {
    route
        .captures
        .iter()
        .filter_map(|(group, name)| {
            captures
                .name(group)
                .map(|value| (name.clone(), value.as_str().to_string()))
        })
        .collect()
}

fn strip_query(path: &str) -> &str {
    path.split_once('?').map_or(path, |(path, _)| path)
}
