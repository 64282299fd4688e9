//! Glue between the declarative route tree and
//! `wayfare_core::server::Manager`'s worker pool: flattens a [`Group`] tree
//! into per-endpoint route tables, composes the transport stack (context
//! insertion, HTTP/1-or-2 detection, the HTTP core, optional TLS
//! termination) for each one, and drives the manager through
//! `Command::Init`.

use std::{fmt::Debug, net::SocketAddr, sync::Arc};

use service_async::{
    layer::{layer_fn, FactoryLayer},
    Param,
};
use wayfare_core::{
    config::RuntimeConfig,
    context::Context,
    http::{incident::IncidentHandler, Handler},
    listener::ListenerBuilder,
    route::{flatten, Group, Tables},
    server::{Command, Manager},
    tls::TlsConfig,
    AnyError,
};
use wayfare_services::{
    common::ContextService,
    http::{H2Detect, HttpCoreServiceFactory, HttpServerTimeout},
    tls::UnifiedTlsFactory,
};

/// What each endpoint's compiled factory chain amounts to: TLS termination
/// (or a pass-through) wrapping context insertion, wrapping HTTP/2
/// detection, wrapping the routing/dispatch core itself.
pub type EndpointFactory<H, IH> =
    UnifiedTlsFactory<ContextService<H2Detect<HttpCoreServiceFactory<H, IH, Context>>>>;

/// Adapts an already-resolved [`TlsConfig`] into the `Param` that
/// [`UnifiedTlsFactory::layer`] expects, mirroring the same bridging
/// struct `wayfare_services::tls` uses internally for its own sub-factories.
struct ConstTlsParam(TlsConfig);

impl Param<TlsConfig> for ConstTlsParam {
    fn param(&self) -> TlsConfig {
        self.0.clone()
    }
}

/// Flatten `root`, compile each endpoint's route table, build its factory
/// chain, and spawn the worker pool via [`Manager`]. Returns the manager so
/// the caller can keep it alive (and later issue hot-reload commands); the
/// returned `Manager` already owns one accept loop per endpoint.
pub async fn serve<H, IH, Err>(
    root: Group<H, IH>,
    root_incident: Vec<IH>,
    http_timeout: HttpServerTimeout,
    runtime_config: RuntimeConfig,
    tls: TlsConfig,
) -> anyhow::Result<Manager<EndpointFactory<H, IH>, ListenerBuilder>>
where
    H: Handler<Context, Error = Err> + Clone + Send + Sync + 'static,
    IH: IncidentHandler + Clone + Send + Sync + 'static,
    Err: Into<AnyError> + Debug,
{
    let mut tables = Tables::default();
    flatten(root, &mut tables).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let mut manager = Manager::new(runtime_config);
    for (endpoint, mut table) in tables.by_endpoint {
        table
            .build()
            .map_err(|(a, b)| anyhow::anyhow!("ambiguous overload at bucket entries {a} and {b}"))?;

        let http_factory = HttpCoreServiceFactory::new(table, root_incident.clone(), http_timeout);
        let detect_factory = H2Detect::layer::<()>().layer(&(), http_factory);
        let ctx_factory = ContextService::layer::<()>().layer(&(), detect_factory);
        let tls_factory = UnifiedTlsFactory::layer::<ConstTlsParam>()
            .layer(&ConstTlsParam(tls.clone()), ctx_factory);

        let addr: SocketAddr = format!("{}:{}", endpoint.address, endpoint.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid endpoint address {}:{}: {e}", endpoint.address, endpoint.port))?;
        let listener_factory = ListenerBuilder::bind_tcp(addr, Default::default())?;
        let name = Arc::new(format!("{}:{}", endpoint.address, endpoint.port));

        manager
            .apply(Command::Init(name, tls_factory, listener_factory))
            .await
            .err()
            .map_err(|e| anyhow::anyhow!("starting endpoint {}:{} failed: {e:?}", endpoint.address, endpoint.port))?;
    }
    Ok(manager)
}
