//! The HTTP-facing half of the core: request-body intake (§4.4), the
//! response pipeline (§4.5), the incident dispatcher (§4.6), and the static
//! file resolver (§4.7). [`begin_request`] ties routing (`crate::route`) to
//! these stages; the channel adapter that actually talks to a transport
//! library is a surrounding concern, not part of this crate.

pub mod body;
pub mod incident;
pub mod response;
pub mod static_files;

use http::Method;

use crate::route::{trie::BucketDispatchError, GroupContext, Lookup, MatchedQuery, Resolved, RouteTable};
use body::{Mode, Outcome};
use incident::{Incident, Status};
use response::{Producer, ResponseMeta};

/// The parts of a request the routing pipeline needs, already extracted by
/// the channel adapter from whatever transport types it speaks.
pub struct RequestHead<'a> {
    pub method: Method,
    pub host: &'a str,
    pub path: &'a str,
    pub query: Vec<(String, String)>,
}

/// What routing + query dispatch decided for one request.
pub enum RequestOutcome<'a, H, IH> {
    Matched {
        handler: &'a H,
        context: &'a GroupContext<IH>,
        values: MatchedQuery,
        automatic_head: bool,
    },
    /// `OPTIONS` with no declared handler at this node: answer 200 with an
    /// Allow header, no incident dispatch involved.
    AutomaticOptions(Vec<Method>),
    Incident(Incident),
}

/// Route + query-dispatch one request. This is the `§2` data flow's first
/// two stages: "the channel adapter looks it up in the route table, selects
/// a response declaration via the query matcher".
pub fn begin_request<'a, H, IH>(
    table: &'a RouteTable<Resolved<H, IH>>,
    head: &RequestHead<'_>,
) -> RequestOutcome<'a, H, IH> {
    match table.lookup(head.host, &head.method, head.path) {
        Lookup::Found {
            bucket,
            automatic_head,
        } => match bucket.dispatch(&head.query) {
            Ok((resolved, values)) => RequestOutcome::Matched {
                handler: &resolved.handler,
                context: &resolved.context,
                values,
                automatic_head,
            },
            Err(BucketDispatchError::NoMatch) => {
                RequestOutcome::Incident(Incident::new(Status::NotFound))
            }
            Err(BucketDispatchError::Ambiguous) => {
                RequestOutcome::Incident(Incident::new(Status::BadRequest).with_detail(
                    "multiple overloaded declarations match this query".to_string(),
                ))
            }
        },
        Lookup::AutomaticOptions(methods) => RequestOutcome::AutomaticOptions(methods),
        Lookup::MethodNotAllowed(methods) => RequestOutcome::Incident(
            Incident::new(Status::MethodNotAllowed)
                .with_allow(methods.iter().map(|m| m.to_string()).collect()),
        ),
        Lookup::NotFound => RequestOutcome::Incident(Incident::new(Status::NotFound)),
    }
}

/// What a matched handler receives, already stripped of any particular
/// transport's request representation.
pub struct HandlerRequest<'a> {
    pub method: Method,
    pub path: &'a str,
    pub query: MatchedQuery,
    pub body: Outcome,
}

/// What a handler must produce; the channel adapter runs it through
/// [`response::render`] before writing it out.
pub struct HandlerResponse {
    pub producer: Producer,
    pub meta: ResponseMeta,
}

/// The contract every response declaration's handler implements. `body_mode`
/// is consulted before a single byte of the body is read, so the intake
/// automaton in `crate::http::body` can be configured up front; `handle` is
/// only invoked once intake has reached `Complete`.
pub trait Handler<Ctx> {
    type Error: Into<crate::AnyError>;

    fn body_mode(&self) -> Mode {
        Mode::None
    }

    fn handle(
        &self,
        req: HandlerRequest<'_>,
        ctx: &Ctx,
    ) -> impl std::future::Future<Output = Result<HandlerResponse, Self::Error>>;
}
