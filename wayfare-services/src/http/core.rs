//! The HTTP/1.1 + HTTP/2 channel adapter: decodes requests off the wire,
//! runs them through `wayfare_core::http::begin_request`, drives body
//! intake, calls the matched handler, and encodes whatever
//! `wayfare_core::http::response::render` produces back onto the wire.
//!
//! For implementation details, see the [module level documentation](crate::http::core).

use std::{fmt::Debug, io, path::PathBuf, rc::Rc, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use monoio::io::{sink::SinkExt, stream::Stream, AsyncReadRent, AsyncWriteRent, Split, Splitable};
use monoio_http::{
    common::{
        body::{Body, HttpBody, StreamHint},
        response::Response as MonoioResponse,
    },
    h1::codec::{decoder::RequestDecoder, encoder::GenericEncoder},
    h2::server::SendResponse,
};
use service_async::Service;
use tracing::{error, info, warn};
use wayfare_core::{
    context::PeerAddr,
    http::{
        begin_request,
        body::BodyIntake,
        incident::{dispatch as dispatch_incident, Incident, IncidentHandler},
        response::{render, ByteRange, ConditionalRequest, Rendered, RenderedBody, StreamProducer},
        Handler, HandlerRequest, RequestHead, RequestOutcome,
    },
    route::{Resolved, RouteTable},
    AnyError,
};

/// 1 MiB: the implicit ceiling every body-intake descriptor is clamped to
/// when a declaration doesn't set its own limit, per spec §4.4.
const DEFAULT_IMPLICIT_LIMIT: u64 = 1 << 20;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HttpServerTimeout {
    pub keepalive_timeout: Option<Duration>,
    pub read_header_timeout: Option<Duration>,
    pub read_body_timeout: Option<Duration>,
}

impl Default for HttpServerTimeout {
    fn default() -> Self {
        const DEFAULT_KEEPALIVE_SEC: u64 = 75;
        Self {
            keepalive_timeout: Some(Duration::from_secs(DEFAULT_KEEPALIVE_SEC)),
            read_header_timeout: None,
            read_body_timeout: None,
        }
    }
}

/// Connection-handling service for one accepted stream, holding the
/// endpoint's compiled route table and its root-level incident handlers
/// (the ones that apply to routing misses, which by definition never
/// matched a group and so have no [`wayfare_core::route::GroupContext`] of
/// their own).
pub struct HttpCoreService<H, IH, Ctx> {
    table: Rc<RouteTable<Resolved<H, IH>>>,
    root_incident: Rc<Vec<IH>>,
    http_timeout: HttpServerTimeout,
    _ctx: std::marker::PhantomData<fn() -> Ctx>,
}

impl<H, IH, Ctx> HttpCoreService<H, IH, Ctx> {
    pub fn new(
        table: Rc<RouteTable<Resolved<H, IH>>>,
        root_incident: Vec<IH>,
        http_timeout: HttpServerTimeout,
    ) -> Self {
        Self {
            table,
            root_incident: Rc::new(root_incident),
            http_timeout,
            _ctx: std::marker::PhantomData,
        }
    }
}

fn host_of(headers: &HeaderMap, uri: &http::Uri) -> String {
    if let Some(host) = uri.host() {
        return host.to_string();
    }
    headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(h).to_string())
        .unwrap_or_default()
}

fn query_pairs(uri: &http::Uri) -> Vec<(String, String)> {
    uri.query()
        .map(|q| {
            form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

fn conditional_of(headers: &HeaderMap, method: &Method) -> ConditionalRequest {
    let split_tags = |v: &http::HeaderValue| {
        v.to_str()
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().trim_matches('"').to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
    };
    ConditionalRequest {
        if_none_match: headers
            .get(http::header::IF_NONE_MATCH)
            .map(split_tags)
            .unwrap_or_default(),
        if_match: headers
            .get(http::header::IF_MATCH)
            .map(split_tags)
            .unwrap_or_default(),
        if_modified_since: headers
            .get(http::header::IF_MODIFIED_SINCE)
            .and_then(|v| httpdate::parse_http_date(v.to_str().ok()?).ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs()),
        if_unmodified_since: headers
            .get(http::header::IF_UNMODIFIED_SINCE)
            .and_then(|v| httpdate::parse_http_date(v.to_str().ok()?).ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs()),
        method_is_mutating: !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS),
    }
}

/// Adapts a [`Rendered`] response body into `monoio_http`'s pull-based
/// `Body` so it can be handed to either the h1 encoder or an h2 send
/// stream without buffering a file or a stream producer up front.
enum OutBody {
    Empty,
    Buffered(Option<Bytes>),
    Stream(Box<dyn StreamProducer>),
    File {
        file: Option<std::fs::File>,
        remaining: u64,
    },
}

impl OutBody {
    fn from_rendered(body: RenderedBody) -> Self {
        match body {
            RenderedBody::None => OutBody::Empty,
            RenderedBody::Buffered(b) => OutBody::Buffered(Some(b)),
            RenderedBody::Stream(s) => OutBody::Stream(s),
            RenderedBody::File { path, range } => match open_ranged(&path, range) {
                Ok((file, remaining)) => OutBody::File {
                    file: Some(file),
                    remaining,
                },
                Err(e) => {
                    warn!("failed to open static file {}: {e}", path.display());
                    OutBody::Empty
                }
            },
        }
    }
}

fn open_ranged(path: &PathBuf, range: Option<ByteRange>) -> io::Result<(std::fs::File, u64)> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = std::fs::File::open(path)?;
    match range {
        Some(r) => {
            file.seek(SeekFrom::Start(r.start))?;
            Ok((file, r.end - r.start))
        }
        None => {
            let len = file.metadata()?.len();
            let _ = file.by_ref();
            Ok((file, len))
        }
    }
}

impl Body for OutBody {
    type Data = Bytes;
    type Error = io::Error;

    fn stream_hint(&self) -> StreamHint {
        match self {
            OutBody::Empty => StreamHint::None,
            OutBody::Buffered(_) => StreamHint::Fixed,
            OutBody::Stream(_) | OutBody::File { .. } => StreamHint::Stream,
        }
    }

    async fn next_data(&mut self) -> Option<Result<Self::Data, Self::Error>> {
        match self {
            OutBody::Empty => None,
            OutBody::Buffered(slot) => slot.take().map(Ok),
            OutBody::Stream(producer) => {
                let mut buf = vec![0u8; 64 * 1024];
                match producer.fill(&mut buf) {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        Some(Ok(Bytes::from(buf)))
                    }
                    Err(e) => Some(Err(e)),
                }
            }
            OutBody::File { file, remaining } => {
                use std::io::Read;
                if *remaining == 0 {
                    return None;
                }
                let chunk = (*remaining).min(64 * 1024) as usize;
                let mut buf = vec![0u8; chunk];
                match file.as_mut().expect("file body polled after close").read(&mut buf) {
                    Ok(0) => None,
                    Ok(n) => {
                        *remaining -= n as u64;
                        buf.truncate(n);
                        Some(Ok(Bytes::from(buf)))
                    }
                    Err(e) => Some(Err(e)),
                }
            }
        }
    }
}

fn rendered_to_response(rendered: Rendered) -> MonoioResponse<OutBody> {
    let mut builder = http::Response::builder().status(
        StatusCode::from_u16(rendered.meta.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );
    if let Some(ct) = &rendered.meta.content_type {
        builder = builder.header(http::header::CONTENT_TYPE, ct.as_str());
    }
    if let Some(len) = rendered.meta.content_length {
        builder = builder.header(http::header::CONTENT_LENGTH, len);
    }
    if let Some(etag) = &rendered.meta.etag {
        builder = builder.header(http::header::ETAG, etag.as_str());
    }
    for (k, v) in &rendered.meta.headers {
        builder = builder.header(k.as_str(), v.as_str());
    }
    builder
        .body(OutBody::from_rendered(rendered.body))
        .expect("well-formed response head")
        .into()
}

fn incident_response(incident: &Incident, chain: &[impl IncidentHandler]) -> MonoioResponse<OutBody> {
    rendered_to_response(dispatch_incident(chain, incident))
}

impl<H, IH, Ctx> HttpCoreService<H, IH, Ctx> {
    async fn run_one<Err>(
        &self,
        method: Method,
        uri: http::Uri,
        headers: HeaderMap,
        mut body: HttpBody,
        ctx: &Ctx,
    ) -> MonoioResponse<OutBody>
    where
        H: Handler<Ctx, Error = Err>,
        IH: IncidentHandler,
        Err: Into<AnyError> + Debug,
    {
        let host = host_of(&headers, &uri);
        let path = uri.path().to_string();
        let head = RequestHead {
            method: method.clone(),
            host: &host,
            path: &path,
            query: query_pairs(&uri),
        };
        let cond = conditional_of(&headers, &method);

        match begin_request(&self.table, &head) {
            RequestOutcome::Matched {
                handler,
                context,
                values,
                automatic_head,
            } => {
                let mode = handler.body_mode();
                let declared_len = headers
                    .get(http::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                let mut intake = BodyIntake::new(
                    mode,
                    context.body_limit.unwrap_or(DEFAULT_IMPLICIT_LIMIT),
                    DEFAULT_IMPLICIT_LIMIT,
                );
                if let Err(reason) = intake.on_head(declared_len) {
                    warn!("body intake aborted on head: {reason:?}");
                    return incident_response(
                        &Incident::new(wayfare_core::http::incident::Status::PayloadTooLarge),
                        &context.incident_handlers,
                    );
                }
                loop {
                    match body.next_data().await {
                        Some(Ok(chunk)) => {
                            if let Err(reason) = intake.on_chunk(&chunk) {
                                warn!("body intake aborted mid-stream: {reason:?}");
                                return incident_response(
                                    &Incident::new(
                                        wayfare_core::http::incident::Status::PayloadTooLarge,
                                    ),
                                    &context.incident_handlers,
                                );
                            }
                        }
                        Some(Err(e)) => {
                            warn!("error reading request body: {e:?}");
                            intake.abort_client_closed();
                            return incident_response(
                                &Incident::new(wayfare_core::http::incident::Status::BadRequest),
                                &context.incident_handlers,
                            );
                        }
                        None => break,
                    }
                }
                let outcome = match intake.on_end() {
                    Ok(outcome) => outcome,
                    Err(reason) => {
                        warn!("body decode failed: {reason:?}");
                        return incident_response(
                            &Incident::new(wayfare_core::http::incident::Status::BadRequest),
                            &context.incident_handlers,
                        );
                    }
                };

                let handler_req = HandlerRequest {
                    method,
                    path: &path,
                    query: values,
                    body: outcome,
                };
                match handler.handle(handler_req, ctx).await {
                    Ok(resp) => match render(resp.producer, resp.meta, automatic_head, Some(&cond)) {
                        Ok(rendered) => rendered_to_response(rendered),
                        Err(e) => {
                            error!("error rendering response: {e:?}");
                            incident_response(
                                &Incident::new(
                                    wayfare_core::http::incident::Status::InternalServerError,
                                ),
                                &context.incident_handlers,
                            )
                        }
                    },
                    Err(e) => {
                        error!("handler returned error: {:?}", e.into());
                        incident_response(
                            &Incident::new(wayfare_core::http::incident::Status::InternalServerError),
                            &context.incident_handlers,
                        )
                    }
                }
            }
            RequestOutcome::AutomaticOptions(methods) => {
                let rendered = Rendered {
                    meta: wayfare_core::http::response::ResponseMeta {
                        status: 200,
                        content_length: Some(0),
                        headers: vec![(
                            "Allow".to_string(),
                            methods.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(", "),
                        )],
                        ..Default::default()
                    },
                    body: RenderedBody::None,
                };
                rendered_to_response(rendered)
            }
            RequestOutcome::Incident(incident) => {
                incident_response(&incident, self.root_incident.as_slice())
            }
        }
    }
}

impl<H, IH, Ctx, Err> HttpCoreService<H, IH, Ctx>
where
    H: Handler<Ctx, Error = Err>,
    IH: IncidentHandler,
    Err: Into<AnyError> + Debug,
    Ctx: Clone,
{
    async fn h1_svc<S>(&self, stream: S, ctx: Ctx)
    where
        S: Split + AsyncReadRent + AsyncWriteRent,
        Ctx: service_async::ParamRef<PeerAddr>,
    {
        let peer = service_async::ParamRef::<PeerAddr>::param_ref(&ctx).0.clone();
        let (reader, writer) = stream.into_split();
        let mut decoder = RequestDecoder::new(reader);
        let mut encoder = GenericEncoder::new(writer);
        decoder.set_timeout(self.http_timeout.keepalive_timeout);

        info!("accepted h1 connection from {peer:?}");
        loop {
            let decoded = match self.http_timeout.read_header_timeout {
                Some(header_timeout) => {
                    match monoio::time::timeout(header_timeout, decoder.next()).await {
                        Ok(inner) => inner,
                        Err(_) => {
                            info!("decode http header timed out");
                            break;
                        }
                    }
                }
                None => decoder.next().await,
            };

            let req = match decoded {
                Some(Ok(req)) => req,
                Some(Err(err)) => {
                    warn!("decode request header failed: {err}");
                    break;
                }
                None => {
                    info!("connection closed");
                    break;
                }
            };

            let (parts, body) = req.into_parts();
            let response = self
                .run_one(parts.method, parts.uri, parts.headers, HttpBody::request(body), &ctx)
                .await;
            if let Err(e) = encoder.send_and_flush(response).await {
                warn!("error when encode and write response: {e}");
                break;
            }
        }
    }

    async fn h2_svc<S>(&self, stream: S, ctx: Ctx)
    where
        S: Split + AsyncReadRent + AsyncWriteRent + Unpin + 'static,
        Ctx: service_async::ParamRef<PeerAddr>,
    {
        let peer = service_async::ParamRef::<PeerAddr>::param_ref(&ctx).0.clone();
        info!("accepted h2 connection from {peer:?}");
        let mut connection = match monoio_http::h2::server::Builder::new()
            .initial_window_size(1_000_000)
            .max_concurrent_streams(1000)
            .handshake::<S, Bytes>(stream)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                error!("h2 server build failed: {e:?}");
                return;
            }
        };

        while let Some(result) = connection.accept().await {
            let (request, response_handle) = match result {
                Ok(r) => r,
                Err(e) => {
                    warn!("h2 accept failed: {e:?}");
                    continue;
                }
            };
            let this = self.clone();
            let ctx = ctx.clone();
            let (parts, body) = request.into_parts();
            monoio::spawn(async move {
                let response = this
                    .run_one(parts.method, parts.uri, parts.headers, HttpBody::request(body), &ctx)
                    .await;
                Self::h2_send(response, response_handle).await;
            });
        }
    }

    async fn h2_send(response: MonoioResponse<OutBody>, mut response_handle: SendResponse<Bytes>) {
        let (parts, mut body) = response.into_parts();
        let head = http::Response::from_parts(parts, ());
        match body.stream_hint() {
            StreamHint::None => {
                let _ = response_handle.send_response(head, true);
            }
            StreamHint::Fixed => {
                let mut send_stream = match response_handle.send_response(head, false) {
                    Ok(s) => s,
                    Err(e) => {
                        error!("h2 send failed: {e:?}");
                        return;
                    }
                };
                if let Some(Ok(data)) = body.next_data().await {
                    let _ = send_stream.send_data(data, true);
                } else {
                    let _ = send_stream.send_data(Bytes::new(), true);
                }
            }
            StreamHint::Stream => {
                let mut send_stream = match response_handle.send_response(head, false) {
                    Ok(s) => s,
                    Err(e) => {
                        error!("h2 send failed: {e:?}");
                        return;
                    }
                };
                while let Some(Ok(data)) = body.next_data().await {
                    let _ = send_stream.send_data(data, false);
                }
                let _ = send_stream.send_data(Bytes::new(), true);
            }
        }
    }
}

impl<H, IH, Ctx, Err, S> Service<(bool, S, Ctx)> for HttpCoreService<H, IH, Ctx>
where
    H: Handler<Ctx, Error = Err>,
    IH: IncidentHandler,
    Err: Into<AnyError> + Debug,
    Ctx: Clone + service_async::ParamRef<PeerAddr>,
    S: Split + AsyncReadRent + AsyncWriteRent + Unpin + 'static,
{
    type Response = ();
    type Error = std::convert::Infallible;

    async fn call(&self, (use_h2, stream, ctx): (bool, S, Ctx)) -> Result<Self::Response, Self::Error> {
        if use_h2 {
            self.h2_svc(stream, ctx).await;
        } else {
            self.h1_svc(stream, ctx).await;
        }
        Ok(())
    }
}

impl<H, IH, Ctx> Clone for HttpCoreService<H, IH, Ctx> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            root_incident: self.root_incident.clone(),
            http_timeout: self.http_timeout,
            _ctx: std::marker::PhantomData,
        }
    }
}

/// What `wayfare::serve` hands to [`wayfare_core::server::Manager`]: unlike
/// [`HttpCoreService`] itself (`Rc`-based, thread-local once built), this
/// holds `Arc`-shared compiled route data and so is `Send`, satisfying the
/// manager's requirement that a factory be cheaply cloned and broadcast to
/// every worker thread, each of which then builds its own
/// thread-local `HttpCoreService` off of it (mirroring the teacher
/// codebase's pattern of threading a plain, clonable config value to each
/// worker and only wrapping it in `Rc` once it lands on that worker's own
/// thread).
pub struct HttpCoreServiceFactory<H, IH, Ctx> {
    table: std::sync::Arc<RouteTable<Resolved<H, IH>>>,
    root_incident: std::sync::Arc<Vec<IH>>,
    http_timeout: HttpServerTimeout,
    _ctx: std::marker::PhantomData<fn() -> Ctx>,
}

impl<H, IH, Ctx> HttpCoreServiceFactory<H, IH, Ctx> {
    pub fn new(
        table: RouteTable<Resolved<H, IH>>,
        root_incident: Vec<IH>,
        http_timeout: HttpServerTimeout,
    ) -> Self {
        Self {
            table: std::sync::Arc::new(table),
            root_incident: std::sync::Arc::new(root_incident),
            http_timeout,
            _ctx: std::marker::PhantomData,
        }
    }
}

impl<H, IH, Ctx> Clone for HttpCoreServiceFactory<H, IH, Ctx> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            root_incident: self.root_incident.clone(),
            http_timeout: self.http_timeout,
            _ctx: std::marker::PhantomData,
        }
    }
}

impl<H, IH, Ctx> service_async::MakeService for HttpCoreServiceFactory<H, IH, Ctx>
where
    H: Clone,
    IH: Clone,
{
    type Service = HttpCoreService<H, IH, Ctx>;
    type Error = std::convert::Infallible;

    fn make_via_ref(&self, _old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        Ok(HttpCoreService::new(
            Rc::new((*self.table).clone()),
            (*self.root_incident).clone(),
            self.http_timeout,
        ))
    }
}

impl<H, IH, Ctx> service_async::AsyncMakeService for HttpCoreServiceFactory<H, IH, Ctx>
where
    H: Clone,
    IH: Clone,
{
    type Service = HttpCoreService<H, IH, Ctx>;
    type Error = std::convert::Infallible;

    async fn make_via_ref(&self, _old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        Ok(HttpCoreService::new(
            Rc::new((*self.table).clone()),
            (*self.root_incident).clone(),
            self.http_timeout,
        ))
    }
}
