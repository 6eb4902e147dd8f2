//! Route table: conversation path patterns bound to handlers.
//!
//! Built once from a declarative list and read-only afterwards. Patterns are
//! `/`-separated; a `:name` segment matches any single segment and binds it.

use crate::bot::context::Bot;
use crate::bot::event::InboundEvent;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Entry path; every table must bind it.
pub const ROOT: &str = "/";

/// Handler body: receives the conversational context and the event (with params).
pub type Handler =
    Arc<dyn Fn(Bot, InboundEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("route table has no handler for the root path \"/\"")]
    MissingRoot,
    #[error("invalid route pattern {0:?}")]
    InvalidPattern(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// One (pattern, handler) binding.
#[derive(Clone)]
pub struct Route {
    pattern: String,
    segments: Vec<Segment>,
    handler: Handler,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl Route {
    pub fn new<F, Fut>(pattern: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Bot, InboundEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let pattern = pattern.into();
        let segments = parse_pattern(&pattern);
        let handler: Handler = Arc::new(move |bot, event| Box::pin(handler(bot, event)));
        Self {
            pattern,
            segments,
            handler,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn matches(&self, path: &[&str]) -> Option<HashMap<String, String>> {
        if self.segments.len() != path.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, value) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(lit) if lit == value => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), (*value).to_string());
                }
            }
        }
        Some(params)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    split_path(pattern)
        .into_iter()
        .map(|s| match s.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_string()),
            None => Segment::Literal(s.to_string()),
        })
        .collect()
}

/// Result of a successful match.
#[derive(Clone)]
pub struct RouteMatch {
    pub pattern: String,
    pub handler: Handler,
    pub params: HashMap<String, String>,
}

/// Immutable pattern -> handler table.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<Route>,
    root: usize,
}

impl RouteTable {
    /// Build the table. A repeated pattern replaces the earlier binding in place
    /// (last registration wins); the root path must be bound.
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Result<Self, RouteError> {
        let mut table: Vec<Route> = Vec::new();
        for route in routes {
            if route.segments.iter().any(|s| matches!(s, Segment::Param(n) if n.is_empty())) {
                return Err(RouteError::InvalidPattern(route.pattern));
            }
            match table.iter_mut().find(|r| r.segments == route.segments) {
                Some(existing) => {
                    log::debug!("route {} registered twice; last binding wins", route.pattern);
                    *existing = route;
                }
                None => table.push(route),
            }
        }
        let root = table
            .iter()
            .position(|r| r.segments.is_empty())
            .ok_or(RouteError::MissingRoot)?;
        Ok(Self {
            routes: table,
            root,
        })
    }

    /// First registered pattern matching `path`, with its bound params.
    pub fn match_path(&self, path: &str) -> Option<RouteMatch> {
        let parts = split_path(path);
        self.routes.iter().find_map(|route| {
            route.matches(&parts).map(|params| RouteMatch {
                pattern: route.pattern.clone(),
                handler: route.handler.clone(),
                params,
            })
        })
    }

    pub fn contains(&self, path: &str) -> bool {
        let parts = split_path(path);
        self.routes.iter().any(|r| r.matches(&parts).is_some())
    }

    /// Match `path`, falling back to the root handler.
    pub fn resolve(&self, path: &str) -> RouteMatch {
        self.match_path(path).unwrap_or_else(|| {
            let root = &self.routes[self.root];
            RouteMatch {
                pattern: root.pattern.clone(),
                handler: root.handler.clone(),
                params: HashMap::new(),
            }
        })
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.pattern.as_str())
    }
}
