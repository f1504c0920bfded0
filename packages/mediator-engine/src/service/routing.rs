//! Routing table: maps a request path to the descriptor of the handler that
//! serves it.
//!
//! Exact paths are checked first. Regex routes are tried afterwards in
//! registration order and must match the whole path. An unmatched path is a
//! normal outcome (`None`), not an error.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

use super::registry::MediatorContext;
use super::request::{MediatorHttpRequest, RequestHandle};

// ---------------------------------------------------------------------------
// RoutingError
// ---------------------------------------------------------------------------

/// Errors raised while building a routing table.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("invalid route pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

// ---------------------------------------------------------------------------
// RouteHandler
// ---------------------------------------------------------------------------

/// User-supplied handler for one routed request.
///
/// Receives the canonical request exactly once. Completion is signalled
/// through the request's [`RequestHandle`], not through a return value.
#[async_trait]
pub trait RouteHandler: Send {
    async fn handle(self: Box<Self>, request: MediatorHttpRequest);
}

type HandlerFactory = dyn Fn(&MediatorContext) -> Box<dyn RouteHandler> + Send + Sync;

// ---------------------------------------------------------------------------
// RouteDescriptor
// ---------------------------------------------------------------------------

/// Named factory producing a fresh [`RouteHandler`] per request.
///
/// The factory receives the shared [`MediatorContext`] and decides which
/// parts of it the handler captures.
#[derive(Clone)]
pub struct RouteDescriptor {
    name: String,
    factory: Arc<HandlerFactory>,
}

impl RouteDescriptor {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&MediatorContext) -> Box<dyn RouteHandler> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds a new handler instance for one request.
    #[must_use]
    pub fn build(&self, context: &MediatorContext) -> Box<dyn RouteHandler> {
        (self.factory)(context)
    }
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// handler_fn adapter
// ---------------------------------------------------------------------------

struct FnHandler<F> {
    f: Arc<F>,
    context: MediatorContext,
}

#[async_trait]
impl<F, Fut> RouteHandler for FnHandler<F>
where
    F: Fn(MediatorContext, MediatorHttpRequest, RequestHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(self: Box<Self>, request: MediatorHttpRequest) {
        let Some(handle) = request.handle().cloned() else {
            warn!(path = %request.path, "routed request has no reply target");
            return;
        };
        let this = *self;
        (this.f)(this.context, request, handle).await;
    }
}

/// Turns an async closure into a route descriptor.
///
/// The closure is called once per request with the shared context, the
/// canonical request and its reply handle.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> RouteDescriptor
where
    F: Fn(MediatorContext, MediatorHttpRequest, RequestHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let f = Arc::new(f);
    RouteDescriptor::new(name, move |context| {
        Box::new(FnHandler {
            f: Arc::clone(&f),
            context: context.clone(),
        })
    })
}

// ---------------------------------------------------------------------------
// RoutingTable
// ---------------------------------------------------------------------------

/// Path-to-handler mapping, built once at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    exact: HashMap<String, RouteDescriptor>,
    patterns: Vec<(Regex, RouteDescriptor)>,
}

impl RoutingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an exact-path route. A duplicate path overwrites the
    /// earlier descriptor, which is returned.
    pub fn add_route(
        &mut self,
        path: impl Into<String>,
        descriptor: RouteDescriptor,
    ) -> Option<RouteDescriptor> {
        self.exact.insert(path.into(), descriptor)
    }

    /// Registers a regex route matched against the whole path.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::InvalidPattern`] if `pattern` does not compile.
    pub fn add_regex_route(
        &mut self,
        pattern: &str,
        descriptor: RouteDescriptor,
    ) -> Result<(), RoutingError> {
        let anchored = format!("^(?:{pattern})$");
        let regex = Regex::new(&anchored).map_err(|source| RoutingError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        if let Some(slot) = self
            .patterns
            .iter_mut()
            .find(|(existing, _)| existing.as_str() == regex.as_str())
        {
            slot.1 = descriptor;
        } else {
            self.patterns.push((regex, descriptor));
        }
        Ok(())
    }

    /// Resolves `path` to its descriptor, or `None` when no route matches.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&RouteDescriptor> {
        self.exact.get(path).or_else(|| {
            self.patterns
                .iter()
                .find(|(regex, _)| regex.is_match(path))
                .map(|(_, descriptor)| descriptor)
        })
    }

    /// Total number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
