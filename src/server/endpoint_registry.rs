//! Endpoint registry for collecting endpoints of different model types

use axum::Router;
use std::sync::Arc;

use crate::config::ConfigError;
use crate::core::dispatch::Drain;
use crate::core::model::Model;
use crate::server::endpoint::{Endpoint, MountedEndpoint};

/// Type-erased endpoint, so endpoints over different models can be stored together
pub trait EndpointDescriptor: Send {
    /// The route prefix (e.g., "/api/pages")
    fn uri(&self) -> &str;

    /// The resource name (e.g., "pages")
    fn resource(&self) -> String;

    /// Build the routes for this endpoint
    fn mount(self: Box<Self>) -> Result<MountedEndpoint, ConfigError>;
}

impl<M: Model> EndpointDescriptor for Endpoint<M> {
    fn uri(&self) -> &str {
        &self.config().uri
    }

    fn resource(&self) -> String {
        self.config().resource_name()
    }

    fn mount(self: Box<Self>) -> Result<MountedEndpoint, ConfigError> {
        Endpoint::mount(*self)
    }
}

/// Registry for all endpoints in the application
#[derive(Default)]
pub struct EndpointRegistry {
    descriptors: Vec<Box<dyn EndpointDescriptor>>,
}

impl EndpointRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    /// Register an endpoint
    ///
    /// A later endpoint with the same uri replaces the earlier one.
    pub fn register(&mut self, descriptor: Box<dyn EndpointDescriptor>) {
        self.descriptors.retain(|d| d.uri() != descriptor.uri());
        self.descriptors.push(descriptor);
    }

    /// All registered resource names, in registration order
    pub fn resources(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.resource()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Mount every endpoint and merge their routes
    ///
    /// Returns the merged router plus one drain handle per endpoint.
    pub fn build_routes(self) -> Result<(Router, Vec<Arc<dyn Drain>>), ConfigError> {
        let mut router = Router::new();
        let mut drains = Vec::with_capacity(self.descriptors.len());

        for descriptor in self.descriptors {
            let mounted = descriptor.mount()?;
            router = router.merge(mounted.router);
            drains.push(mounted.drain);
        }

        Ok((router, drains))
    }
}
