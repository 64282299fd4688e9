//! Embeddable HTTP server framework: a declarative route tree compiled into
//! per-endpoint query-dispatch tables (`wayfare_core::route`), a request
//! body/response pipeline (`wayfare_core::http`), and a worker-pool
//! transport driven by `wayfare_core::server::Manager`. This crate is the
//! facade tying those together: [`app::GroupBuilder`] builds the route
//! tree, [`serve::serve`] compiles and runs it.

pub mod app;
pub mod serve;

pub use wayfare_core::{
    config::RuntimeConfig,
    context::Context,
    http::{
        body::Mode,
        incident::{Incident, IncidentHandler, Status},
        response::{Producer, ResponseMeta},
        Handler, HandlerRequest, HandlerResponse,
    },
    route::{HostSpec, QueryItemDescriptor, QuerySpec, TrailingSlash},
    tls::TlsConfig,
    AnyError, AnyResult,
};
pub use wayfare_services::http::HttpServerTimeout;

pub use app::GroupBuilder;
pub use serve::serve;
