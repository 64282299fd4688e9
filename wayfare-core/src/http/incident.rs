//! Incident dispatcher (§4.6): recoverable per-request conditions that map
//! to a default HTTP status, and may be overridden by a handler declared on
//! an enclosing group.

use super::response::{Rendered, RenderedBody, ResponseMeta};

/// The built-in status catalog a default incident response may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    PayloadTooLarge,
    InternalServerError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::BadRequest => 400,
            Status::Unauthorized => 401,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::PayloadTooLarge => 413,
            Status::InternalServerError => 500,
        }
    }

    fn default_body(self) -> &'static str {
        match self {
            Status::BadRequest => "Bad Request",
            Status::Unauthorized => "Unauthorized",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::InternalServerError => "Internal Server Error",
        }
    }
}

/// One recoverable condition surfaced by routing, intake, or a user
/// handler.
#[derive(Debug, Clone)]
pub struct Incident {
    pub status: Status,
    /// E.g. the Allow header's method list for a 405, or a decode error
    /// message — purely informational, handlers may ignore it.
    pub detail: Option<String>,
    pub allow: Vec<String>,
}

impl Incident {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            detail: None,
            allow: Vec::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_allow(mut self, methods: Vec<String>) -> Self {
        self.allow = methods;
        self
    }
}

/// A user-supplied incident handler: returns `Some` to override the
/// built-in default response, `None` to let an enclosing handler (or the
/// built-in default) take over.
pub trait IncidentHandler {
    fn handle(&self, incident: &Incident) -> Option<Rendered>;
}

impl<F> IncidentHandler for F
where
    F: Fn(&Incident) -> Option<Rendered>,
{
    fn handle(&self, incident: &Incident) -> Option<Rendered> {
        self(incident)
    }
}

/// Walk the enclosing group-context chain innermost-first (the chain is
/// already stored that way, see [`crate::route::GroupContext`]); the first
/// handler to return `Some` wins. If none intervenes, emit the minimal
/// built-in response for the incident's status.
pub fn dispatch<H: IncidentHandler>(chain: &[H], incident: &Incident) -> Rendered {
    for handler in chain {
        if let Some(rendered) = handler.handle(incident) {
            return rendered;
        }
    }
    built_in_default(incident)
}

fn built_in_default(incident: &Incident) -> Rendered {
    let mut meta = ResponseMeta::with_status(incident.status.code());
    meta.content_type = Some("text/plain".to_string());
    if !incident.allow.is_empty() {
        meta.headers.push(("Allow".to_string(), incident.allow.join(", ")));
    }
    let body = incident.status.default_body();
    meta.content_length = Some(body.len() as u64);
    Rendered {
        meta,
        body: RenderedBody::Buffered(bytes::Bytes::from_static(body.as_bytes())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Never;
    impl IncidentHandler for Never {
        fn handle(&self, _incident: &Incident) -> Option<Rendered> {
            None
        }
    }

    struct Always(&'static str);
    impl IncidentHandler for Always {
        fn handle(&self, _incident: &Incident) -> Option<Rendered> {
            Some(Rendered {
                meta: ResponseMeta::with_status(200),
                body: RenderedBody::Buffered(bytes::Bytes::from_static(self.0.as_bytes())),
            })
        }
    }

    #[test]
    fn falls_through_to_built_in_default_when_no_handler_intervenes() {
        let chain: Vec<Never> = vec![Never, Never];
        let rendered = dispatch(&chain, &Incident::new(Status::NotFound));
        assert_eq!(rendered.meta.status, 404);
    }

    #[test]
    fn innermost_handler_wins() {
        struct Dyn(Box<dyn IncidentHandler>);
        impl IncidentHandler for Dyn {
            fn handle(&self, incident: &Incident) -> Option<Rendered> {
                self.0.handle(incident)
            }
        }
        let chain: Vec<Dyn> = vec![Dyn(Box::new(Always("inner"))), Dyn(Box::new(Always("outer")))];
        let rendered = dispatch(&chain, &Incident::new(Status::NotFound));
        match rendered.body {
            RenderedBody::Buffered(b) => assert_eq!(&b[..], b"inner"),
            _ => panic!("expected buffered body"),
        }
    }

    #[test]
    fn method_not_allowed_carries_allow_header() {
        let chain: Vec<Never> = Vec::new();
        let incident = Incident::new(Status::MethodNotAllowed)
            .with_allow(vec!["GET".into(), "POST".into()]);
        let rendered = dispatch(&chain, &incident);
        assert!(rendered
            .meta
            .headers
            .iter()
            .any(|(k, v)| k == "Allow" && v == "GET, POST"));
    }
}
