//! Server module for mounting endpoints as HTTP routes
//!
//! - [`Endpoint`]: builder for one CRUD resource and its hooks
//! - [`EndpointRegistry`]: collects endpoints over different model types
//! - [`ServerBuilder`]: health route, tracing, panic safety net and graceful
//!   shutdown with post-write draining

pub mod builder;
pub mod endpoint;
pub mod endpoint_registry;
pub mod handlers;

pub use builder::{App, ServerBuilder};
pub use endpoint::{Endpoint, Middleware, MountedEndpoint};
pub use endpoint_registry::{EndpointDescriptor, EndpointRegistry};
