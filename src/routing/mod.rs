//! Route compilation and request matching.
//!
//! ```text
//! "/users/:id(num)"  --compile_path-->  [users][:id ~ \d+]  +  ^\/?users\/(?P<p0>\d+)\/?$
//!                                                 |
//!                                      RouteTable::add_route (bucketed)
//!                                                 |
//! GET /users/42  -----------------> RequestMatcher::match_request --> RouteMatch { id: "42" }
//! ```

mod matcher;
mod method;
mod schema;
mod table;

pub use matcher::{RequestMatcher, RouteMatch};
pub use method::HttpMethod;
pub use schema::{
    compile_path, join_paths, normalize_path, split_path, CompiledPath, PathSegment, RoutePath,
    SegmentPattern,
};
pub use table::{CompiledRoute, RouteBucket, RouteTable};
