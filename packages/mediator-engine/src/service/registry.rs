use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::info;

use super::config::MediatorConfig;
use crate::connectors::ConnectorSet;

// ---------------------------------------------------------------------------
// MediatorContext
// ---------------------------------------------------------------------------

/// Shared, read-mostly resources handed to handler factories and startup
/// components. Cloning is cheap.
#[derive(Clone)]
pub struct MediatorContext {
    pub config: Arc<MediatorConfig>,
    pub connectors: ConnectorSet,
    pub components: Arc<ComponentRegistry>,
}

impl MediatorContext {
    /// Creates a context with an empty component registry.
    #[must_use]
    pub fn new(config: MediatorConfig, connectors: ConnectorSet) -> Self {
        Self {
            config: Arc::new(config),
            connectors,
            components: Arc::new(ComponentRegistry::new()),
        }
    }

    #[must_use]
    pub fn with_components(mut self, components: ComponentRegistry) -> Self {
        self.components = Arc::new(components);
        self
    }
}

impl std::fmt::Debug for MediatorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediatorContext")
            .field("name", &self.config.name)
            .field("components", &self.components.names())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ManagedComponent trait
// ---------------------------------------------------------------------------

/// Singleton component launched once at startup, before any request is
/// routed.
///
/// Components are initialized in registration order and shut down in reverse
/// registration order. The `Any` bound enables type-based lookup via
/// [`ComponentRegistry::get`].
#[async_trait]
pub trait ManagedComponent: Send + Sync + Any {
    /// Unique name of this component.
    fn name(&self) -> &'static str;

    async fn init(&self, context: &MediatorContext) -> anyhow::Result<()>;

    async fn shutdown(&self) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry of startup components, addressable by name or concrete type.
pub struct ComponentRegistry {
    by_name: DashMap<&'static str, Arc<dyn ManagedComponent>>,
    by_type: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    /// Registration order for deterministic init/shutdown sequencing.
    init_order: RwLock<Vec<&'static str>>,
    initialized: AtomicBool,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_type: DashMap::new(),
            init_order: RwLock::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Registers a component. A component registered under an existing name
    /// replaces the earlier one but keeps its position in the init order.
    pub fn register<T: ManagedComponent>(&self, component: T) {
        let name = component.name();
        let arc = Arc::new(component);
        let replaced = self.by_name.insert(name, arc.clone()).is_some();
        self.by_type.insert(TypeId::of::<T>(), arc);
        if !replaced {
            self.init_order.write().push(name);
        }
    }

    /// Retrieves a component by its concrete type.
    #[must_use]
    pub fn get<T: ManagedComponent>(&self) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    /// Retrieves a component by its name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn ManagedComponent>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    /// Component names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.init_order.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Initializes all components in registration order. Runs at most once;
    /// later calls return immediately.
    ///
    /// # Errors
    ///
    /// Returns the first `init()` failure. Components after it are not
    /// initialized.
    pub async fn init_all(&self, context: &MediatorContext) -> anyhow::Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for name in self.names() {
            if let Some(component) = self.get_by_name(name) {
                component.init(context).await?;
                info!(component = name, "startup component initialized");
            }
        }
        Ok(())
    }

    /// Shuts down all components in reverse registration order.
    ///
    /// # Errors
    ///
    /// Returns the first `shutdown()` failure.
    pub async fn shutdown_all(&self) -> anyhow::Result<()> {
        for name in self.names().iter().rev() {
            if let Some(component) = self.get_by_name(name) {
                component.shutdown().await?;
            }
        }
        Ok(())
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
