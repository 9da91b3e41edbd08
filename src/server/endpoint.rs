//! Endpoint builder
//!
//! An [`Endpoint`] serves one resource backed by one collection. It owns its
//! configuration, its database handle and every registered hook. Once mounted
//! it is read-only.
//!
//! ```rust,ignore
//! let endpoint = Endpoint::new("/api/pages", Arc::new(db), Page::default)
//!     .query_params(["content", "$in_tags"])
//!     .soft_delete(true)
//!     .pre_find(OperationSet::READ, |ctx: &RequestContext, _: Operation, filter: &mut Filter| {
//!         if ctx.header("x-admin").is_none() {
//!             filter.insert("published", json!(true));
//!         }
//!         Ok(())
//!     });
//!
//! let app = endpoint.into_router()?;
//! ```
//!
//! Hook closures need their argument types written out so they are accepted
//! for every borrow lifetime.

use axum::Router;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{MethodRouter, delete, get, post, put};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;

use crate::config::{ConfigError, DispatchConfig, EndpointConfig, PaginationConfig};
use crate::core::dispatch::{Drain, PostWriteDispatcher};
use crate::core::hooks::{
    CollectionNameFilter, DocumentFilter, Hooks, ListResponseFilter, Operation, OperationSet,
    PostReadHook, PostWriteHook, PreServeHook, QueryFilter, SingleResponseFilter,
};
use crate::core::model::{Model, ModelFactory};
use crate::core::pipeline::Pipeline;
use crate::core::translator::QueryTranslator;
use crate::server::handlers::{self, EndpointState, SharedState};
use crate::storage::Database;

/// Middleware wrapping one or more operation routes
pub type Middleware = Arc<dyn Fn(Request, Next) -> BoxFuture<'static, Response> + Send + Sync>;

/// Routes and shutdown handle of a mounted endpoint
pub struct MountedEndpoint {
    pub router: Router,
    pub drain: Arc<dyn Drain>,
}

/// A CRUD endpoint under construction
pub struct Endpoint<M: Model> {
    config: EndpointConfig,
    database: Arc<dyn Database>,
    factory: Arc<dyn ModelFactory<M>>,
    hooks: Hooks<M>,
    middleware: Vec<(OperationSet, Middleware)>,
}

impl<M: Model> Endpoint<M> {
    /// Endpoint at `uri`; the resource and collection default to the last path segment
    pub fn new(
        uri: impl Into<String>,
        database: Arc<dyn Database>,
        factory: impl ModelFactory<M> + 'static,
    ) -> Self {
        Self::from_config(EndpointConfig::new(uri), database, factory)
    }

    pub fn from_config(
        config: EndpointConfig,
        database: Arc<dyn Database>,
        factory: impl ModelFactory<M> + 'static,
    ) -> Self {
        Self {
            config,
            database,
            factory: Arc::new(factory),
            hooks: Hooks::default(),
            middleware: Vec::new(),
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn resource(mut self, name: impl Into<String>) -> Self {
        self.config.resource = Some(name.into());
        self
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.config.collection = Some(name.into());
        self
    }

    /// Replace the allow-list of filter parameters
    pub fn query_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.query_params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_full_query(mut self, enabled: bool) -> Self {
        self.config.allow_full_query = enabled;
        self
    }

    pub fn soft_delete(mut self, enabled: bool) -> Self {
        self.config.soft_delete = enabled;
        self
    }

    pub fn pagination(mut self, pagination: PaginationConfig) -> Self {
        self.config.pagination = pagination;
        self
    }

    pub fn dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.config.dispatch = dispatch;
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.config.max_body_bytes = limit;
        self
    }

    pub fn pre_serve(mut self, ops: impl Into<OperationSet>, hook: impl PreServeHook + 'static) -> Self {
        self.hooks.pre_serve.push(ops.into(), Arc::new(hook));
        self
    }

    pub fn pre_find(mut self, ops: impl Into<OperationSet>, hook: impl QueryFilter + 'static) -> Self {
        self.hooks.pre_find.push(ops.into(), Arc::new(hook));
        self
    }

    pub fn post_retrieve(
        mut self,
        ops: impl Into<OperationSet>,
        hook: impl DocumentFilter<M> + 'static,
    ) -> Self {
        self.hooks.post_retrieve.push(ops.into(), Arc::new(hook));
        self
    }

    pub fn pre_save(mut self, ops: impl Into<OperationSet>, hook: impl DocumentFilter<M> + 'static) -> Self {
        self.hooks.pre_save.push(ops.into(), Arc::new(hook));
        self
    }

    /// Single-resource response filter (readOne, create, update)
    pub fn pre_response(
        mut self,
        ops: impl Into<OperationSet>,
        hook: impl SingleResponseFilter<M> + 'static,
    ) -> Self {
        self.hooks.pre_response_single.push(ops.into(), Arc::new(hook));
        self
    }

    /// List response filter (readList)
    pub fn pre_response_list(
        mut self,
        ops: impl Into<OperationSet>,
        hook: impl ListResponseFilter<M> + 'static,
    ) -> Self {
        self.hooks.pre_response_list.push(ops.into(), Arc::new(hook));
        self
    }

    pub fn post_read(mut self, ops: impl Into<OperationSet>, hook: impl PostReadHook + 'static) -> Self {
        self.hooks.post_read.push(ops.into(), Arc::new(hook));
        self
    }

    pub fn post_write(mut self, ops: impl Into<OperationSet>, hook: impl PostWriteHook<M> + 'static) -> Self {
        self.hooks.post_write.push(ops.into(), Arc::new(hook));
        self
    }

    pub fn collection_name_filter(mut self, filter: impl CollectionNameFilter + 'static) -> Self {
        self.hooks.collection_name.push(Arc::new(filter));
        self
    }

    /// Wrap the routes of `ops` in a middleware; the first registered runs outermost
    pub fn middleware<F, Fut>(mut self, ops: impl Into<OperationSet>, f: F) -> Self
    where
        F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let wrapped: Middleware = Arc::new(move |request: Request, next: Next| -> BoxFuture<'static, Response> {
            Box::pin(f(request, next))
        });
        self.middleware.push((ops.into(), wrapped));
        self
    }

    /// Validate the configuration and build the routes
    pub fn mount(self) -> Result<MountedEndpoint, ConfigError> {
        self.config.validate()?;

        let uri = self.config.uri.trim_end_matches('/').to_string();
        let hooks = Arc::new(self.hooks);
        let dispatcher = Arc::new(PostWriteDispatcher::new(
            hooks.clone(),
            self.config.dispatch.workers,
            self.config.dispatch.queue_capacity,
        ));

        let pipeline = Pipeline {
            resource: self.config.resource_name(),
            collection: self.config.collection_name(),
            database: self.database,
            factory: self.factory,
            hooks,
            translator: QueryTranslator::new(self.config.query_params.clone(), self.config.allow_full_query),
            list: self.config.pagination.to_settings(),
            soft_delete: self.config.soft_delete,
            dispatcher: dispatcher.clone(),
        };
        tracing::debug!(
            uri = %uri,
            resource = %pipeline.resource,
            collection = %pipeline.collection,
            "mounting endpoint"
        );

        let state: SharedState<M> = Arc::new(EndpointState {
            pipeline,
            max_body_bytes: self.config.max_body_bytes,
        });

        let middleware = self.middleware;
        let wrap = |op: Operation, route: MethodRouter<SharedState<M>>| {
            middleware
                .iter()
                .rev()
                .filter(|(ops, _)| ops.contains(op))
                .fold(route, |route, (_, mw)| {
                    let mw = mw.clone();
                    route.layer(axum::middleware::from_fn(move |request: Request, next: Next| {
                        mw(request, next)
                    }))
                })
        };

        let collection_routes = wrap(Operation::ReadList, get(handlers::read_list::<M>))
            .merge(wrap(Operation::Create, post(handlers::create::<M>)));
        let item_routes = wrap(Operation::ReadOne, get(handlers::read_one::<M>))
            .merge(wrap(Operation::Update, put(handlers::update::<M>)))
            .merge(wrap(Operation::Delete, delete(handlers::delete::<M>)));

        let router = Router::new()
            .route(&uri, collection_routes)
            .route(&format!("{uri}/{{id}}"), item_routes)
            .with_state(state)
            .layer(CatchPanicLayer::custom(handlers::panic_response));

        Ok(MountedEndpoint {
            router,
            drain: dispatcher,
        })
    }

    /// Build the routes, discarding the shutdown handle
    pub fn into_router(self) -> Result<Router, ConfigError> {
        Ok(self.mount()?.router)
    }
}
