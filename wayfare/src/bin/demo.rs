//! Standalone demo binary exercising the handful of response shapes the
//! framework is meant to cover: a static greeting, a byte-identical echo,
//! a randomized value drawn from a query-supplied range, a three-way
//! overloaded declaration disambiguated purely by which query parameters
//! are present, a body intake with an explicit size limit, a served static
//! directory with index-file fallback, and the automatic 404 for an
//! unmatched path.
//!
//! Every route in one tree shares a single handler type — `Group<H, IH>` is
//! monomorphic in `H` — so the demo's routes are variants of one enum rather
//! than distinct structs, the same way `wayfare_services::tls::UnifiedTlsService`
//! folds several transport-specific services behind one type.

use std::convert::Infallible;

use clap::Parser;
use rand::Rng;
use wayfare::{
    app::GroupBuilder, Context, Handler, HandlerRequest, HandlerResponse, HostSpec, Incident, Mode,
    Producer, QueryItemDescriptor, QuerySpec, ResponseMeta, RuntimeConfig, TlsConfig, TrailingSlash,
};
use wayfare_core::http::{body::Outcome, response::Rendered, static_files::StaticFileHandler};

#[derive(Parser)]
struct Args {
    /// Address the demo endpoint binds to.
    #[arg(long, default_value = "127.0.0.1")]
    address: String,
    /// Port the demo endpoint binds to.
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Directory served under `/static`.
    #[arg(long, default_value = "./static")]
    static_dir: std::path::PathBuf,
}

#[derive(serde::Serialize)]
struct RandomValue {
    value: i64,
}

#[derive(serde::Serialize)]
struct RangeValues {
    values: Vec<u64>,
}

/// `to` is exclusive, `through` is inclusive; `ThroughOnly` is the overload
/// with no `from` (implicit 0). Three declarations at the same path carry
/// different modes so the query matcher can tell which one a request
/// matched by its distinct descriptor set.
#[derive(Clone, Copy)]
enum RangeMode {
    Exclusive,
    Inclusive,
    ThroughOnly,
}

#[derive(Clone)]
enum DemoHandler {
    Greet,
    Echo,
    RandomInt,
    RangeUint(RangeMode),
    BodyEcho,
    StaticFile(StaticFileHandler),
}

impl From<StaticFileHandler> for DemoHandler {
    fn from(handler: StaticFileHandler) -> Self {
        DemoHandler::StaticFile(handler)
    }
}

impl Handler<Context> for DemoHandler {
    type Error = Infallible;

    fn body_mode(&self) -> Mode {
        match self {
            DemoHandler::Echo | DemoHandler::BodyEcho => Mode::Data,
            _ => Mode::None,
        }
    }

    async fn handle(
        &self,
        req: HandlerRequest<'_>,
        ctx: &Context,
    ) -> Result<HandlerResponse, Self::Error> {
        match self {
            DemoHandler::Greet => Ok(HandlerResponse {
                producer: Producer::String("hello from wayfare\n".to_string()),
                meta: ResponseMeta::with_status(200),
            }),
            DemoHandler::Echo | DemoHandler::BodyEcho => {
                let body = match req.body {
                    Outcome::Data(bytes) => bytes,
                    _ => bytes::Bytes::new(),
                };
                Ok(HandlerResponse {
                    producer: Producer::Binary(body),
                    meta: ResponseMeta::with_status(200),
                })
            }
            DemoHandler::RandomInt => {
                let from = *req.query.get::<i64>("from").expect("required by declaration");
                let through = *req.query.get::<i64>("through").expect("required by declaration");
                if from > through {
                    return Ok(bad_request("from must not exceed through"));
                }
                let value = rand::thread_rng().gen_range(from..=through);
                Ok(HandlerResponse {
                    producer: Producer::json(&RandomValue { value }).expect("serializable"),
                    meta: ResponseMeta::with_status(200),
                })
            }
            DemoHandler::RangeUint(mode) => {
                let (from, end) = match mode {
                    RangeMode::Exclusive => (
                        *req.query.get::<u64>("from").expect("required by declaration"),
                        *req.query.get::<u64>("to").expect("required by declaration"),
                    ),
                    RangeMode::Inclusive => (
                        *req.query.get::<u64>("from").expect("required by declaration"),
                        *req.query.get::<u64>("through").expect("required by declaration") + 1,
                    ),
                    RangeMode::ThroughOnly => (
                        0,
                        *req.query.get::<u64>("through").expect("required by declaration") + 1,
                    ),
                };
                if end <= from {
                    return Ok(bad_request("range is empty"));
                }
                let values = (from..end).take(1024).collect();
                Ok(HandlerResponse {
                    producer: Producer::json(&RangeValues { values }).expect("serializable"),
                    meta: ResponseMeta::with_status(200),
                })
            }
            DemoHandler::StaticFile(inner) => inner.handle(req, ctx).await,
        }
    }
}

fn bad_request(detail: &str) -> HandlerResponse {
    HandlerResponse {
        producer: Producer::String(detail.to_string()),
        meta: ResponseMeta::with_status(400),
    }
}

/// Body intake never surfaces its 413 through `Handler::handle` — the
/// automaton aborts before a handler is invoked — so every incident this
/// demo doesn't explicitly override falls through to the built-in default
/// response.
fn default_incident(_incident: &Incident) -> Option<Rendered> {
    None
}

#[monoio::main(timer_enabled = true)]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    const BODY_ECHO_LIMIT: u64 = 256 * 1024;

    let root = GroupBuilder::new()
        .endpoint(args.address.clone(), args.port)
        .host(HostSpec::Any)
        .get("/", DemoHandler::Greet)
        .post("/echo", DemoHandler::Echo)
        .get_query(
            "/random/int",
            QuerySpec::Named(vec![
                QueryItemDescriptor::required::<i64>("from"),
                QueryItemDescriptor::required::<i64>("through"),
            ]),
            DemoHandler::RandomInt,
        )
        .route(
            http::Method::GET,
            "/range/uint",
            QuerySpec::Named(vec![
                QueryItemDescriptor::required::<u64>("from"),
                QueryItemDescriptor::required::<u64>("to"),
            ]),
            TrailingSlash::Collapse,
            DemoHandler::RangeUint(RangeMode::Exclusive),
        )
        .route(
            http::Method::GET,
            "/range/uint",
            QuerySpec::Named(vec![
                QueryItemDescriptor::required::<u64>("from"),
                QueryItemDescriptor::required::<u64>("through"),
            ]),
            TrailingSlash::Collapse,
            DemoHandler::RangeUint(RangeMode::Inclusive),
        )
        .route(
            http::Method::GET,
            "/range/uint",
            QuerySpec::Named(vec![QueryItemDescriptor::required::<u64>("through")]),
            TrailingSlash::Collapse,
            DemoHandler::RangeUint(RangeMode::ThroughOnly),
        )
        .group(|g| g.prefix("body").body_limit(BODY_ECHO_LIMIT).post("echo", DemoHandler::BodyEcho))
        .static_files("static", args.static_dir.clone(), vec!["index.html".to_string()])
        .finish();

    let manager = wayfare::serve(
        root,
        vec![default_incident as fn(&Incident) -> Option<Rendered>],
        Default::default(),
        RuntimeConfig::default(),
        TlsConfig::None,
    )
    .await?;

    tracing::info!(address = %args.address, port = args.port, "wayfare demo listening");
    std::mem::forget(manager);
    std::future::pending::<()>().await;
    Ok(())
}
