//! Response pipeline (§4.5): content providers, conditional responses
//! (ETag / If-Modified-Since / If-Match / If-Unmodified-Since), automatic
//! HEAD, and the pull-based streaming contract.

use std::{io, path::PathBuf};

use bytes::Bytes;
use serde::Serialize;

/// A streaming producer: fill `buf` with up to `buf.len()` bytes. `Ok(0)`
/// ends the stream; the transport adapter must honor backpressure between
/// calls and treat a write error as terminal.
pub trait StreamProducer {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<F> StreamProducer for F
where
    F: FnMut(&mut [u8]) -> io::Result<usize>,
{
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self(buf)
    }
}

/// A byte range for a file producer, inclusive start, exclusive end.
#[derive(Debug, Clone, Copy)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Response content, tagged by kind rather than an open class hierarchy
/// (per the design notes): each kind has one fixed calling convention.
pub enum Producer {
    String(String),
    Binary(Bytes),
    Stream(Box<dyn StreamProducer>),
    File { path: PathBuf, range: Option<ByteRange> },
    /// Eagerly serialized at construction time, same calling convention as
    /// `Binary`.
    Json(Bytes),
}

impl Producer {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Producer::Json(Bytes::from(serde_json::to_vec(value)?)))
    }

    /// The producer's length, if known without draining it.
    pub fn known_length(&self) -> Option<u64> {
        match self {
            Producer::String(s) => Some(s.len() as u64),
            Producer::Binary(b) => Some(b.len() as u64),
            Producer::Json(b) => Some(b.len() as u64),
            Producer::File { range: Some(r), .. } => Some(r.end - r.start),
            Producer::File { range: None, .. } => None,
            Producer::Stream(_) => None,
        }
    }
}

/// Per-response metadata the content provider carries alongside its body.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub etag: Option<String>,
    pub last_modified: Option<u64>,
    pub headers: Vec<(String, String)>,
}

impl ResponseMeta {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

/// The conditional headers a request carries, extracted by the channel
/// adapter.
#[derive(Debug, Clone, Default)]
pub struct ConditionalRequest {
    pub if_none_match: Vec<String>,
    pub if_match: Vec<String>,
    pub if_modified_since: Option<u64>,
    pub if_unmodified_since: Option<u64>,
    pub method_is_mutating: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalOutcome {
    NotModified,
    PreconditionFailed,
}

fn tag_matches(tags: &[String], etag: &str) -> bool {
    tags.iter().any(|t| t == "*" || t == etag)
}

/// Evaluate conditional headers against a response's validators. `None`
/// means the pipeline should proceed and emit the response normally.
pub fn evaluate_conditional(
    meta: &ResponseMeta,
    cond: &ConditionalRequest,
) -> Option<ConditionalOutcome> {
    if let Some(etag) = &meta.etag {
        if !cond.if_none_match.is_empty() && tag_matches(&cond.if_none_match, etag) {
            return Some(ConditionalOutcome::NotModified);
        }
    }
    if let Some(last_modified) = meta.last_modified {
        if let Some(ims) = cond.if_modified_since {
            if ims >= last_modified {
                return Some(ConditionalOutcome::NotModified);
            }
        }
    }
    if cond.method_is_mutating {
        if let Some(etag) = &meta.etag {
            if !cond.if_match.is_empty() && !tag_matches(&cond.if_match, etag) {
                return Some(ConditionalOutcome::PreconditionFailed);
            }
        }
        if let (Some(last_modified), Some(ius)) = (meta.last_modified, cond.if_unmodified_since) {
            if last_modified > ius {
                return Some(ConditionalOutcome::PreconditionFailed);
            }
        }
    }
    None
}

/// The body half of a rendered response, after HEAD/conditional handling
/// has been applied.
pub enum RenderedBody {
    None,
    Buffered(Bytes),
    Stream(Box<dyn StreamProducer>),
    File { path: PathBuf, range: Option<ByteRange> },
}

pub struct Rendered {
    pub meta: ResponseMeta,
    pub body: RenderedBody,
}

/// Drive the full response pipeline for one matched declaration: evaluate
/// conditional headers, then apply automatic-HEAD truncation.
///
/// `is_automatic_head` is set when the matched declaration was chosen via
/// the GET→HEAD route-table fallback (§4.2); in that case the body is
/// never written, and Content-Length is computed by draining the producer
/// only when it isn't already known (per the open question in §9, large
/// unknown-length streams pay this cost — callers needing to avoid it
/// should declare an explicit Content-Length).
pub fn render(
    mut producer: Producer,
    mut meta: ResponseMeta,
    is_automatic_head: bool,
    cond: Option<&ConditionalRequest>,
) -> io::Result<Rendered> {
    if let Some(cond) = cond {
        match evaluate_conditional(&meta, cond) {
            Some(ConditionalOutcome::NotModified) => {
                meta.status = 304;
                return Ok(Rendered {
                    meta,
                    body: RenderedBody::None,
                });
            }
            Some(ConditionalOutcome::PreconditionFailed) => {
                meta.status = 412;
                return Ok(Rendered {
                    meta,
                    body: RenderedBody::None,
                });
            }
            None => {}
        }
    }

    if meta.content_length.is_none() {
        meta.content_length = producer.known_length();
    }

    if is_automatic_head {
        if meta.content_length.is_none() {
            let drained = drain_len(&mut producer)?;
            meta.content_length = Some(drained);
        }
        return Ok(Rendered {
            meta,
            body: RenderedBody::None,
        });
    }

    let body = match producer {
        Producer::String(s) => RenderedBody::Buffered(Bytes::from(s.into_bytes())),
        Producer::Binary(b) => RenderedBody::Buffered(b),
        Producer::Json(b) => {
            meta.content_type
                .get_or_insert_with(|| "application/json".to_string());
            RenderedBody::Buffered(b)
        }
        Producer::Stream(s) => RenderedBody::Stream(s),
        Producer::File { path, range } => RenderedBody::File { path, range },
    };

    Ok(Rendered { meta, body })
}

fn drain_len(producer: &mut Producer) -> io::Result<u64> {
    match producer {
        Producer::Stream(s) => {
            let mut buf = [0u8; 8192];
            let mut total = 0u64;
            loop {
                let n = s.fill(&mut buf)?;
                if n == 0 {
                    break;
                }
                total += n as u64;
            }
            Ok(total)
        }
        other => Ok(other.known_length().unwrap_or(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_none_match_short_circuits_to_not_modified() {
        let meta = ResponseMeta {
            status: 200,
            etag: Some("abc".into()),
            ..Default::default()
        };
        let cond = ConditionalRequest {
            if_none_match: vec!["abc".into()],
            ..Default::default()
        };
        let rendered = render(Producer::Binary(Bytes::new()), meta, false, Some(&cond)).unwrap();
        assert_eq!(rendered.meta.status, 304);
        assert!(matches!(rendered.body, RenderedBody::None));
    }

    #[test]
    fn mutating_if_match_mismatch_is_precondition_failed() {
        let meta = ResponseMeta {
            status: 200,
            etag: Some("abc".into()),
            ..Default::default()
        };
        let cond = ConditionalRequest {
            if_match: vec!["xyz".into()],
            method_is_mutating: true,
            ..Default::default()
        };
        let rendered = render(Producer::Binary(Bytes::new()), meta, false, Some(&cond)).unwrap();
        assert_eq!(rendered.meta.status, 412);
    }

    #[test]
    fn automatic_head_emits_no_body_but_known_length() {
        let meta = ResponseMeta::with_status(200);
        let rendered = render(
            Producer::Binary(Bytes::from_static(b"hello")),
            meta,
            true,
            None,
        )
        .unwrap();
        assert!(matches!(rendered.body, RenderedBody::None));
        assert_eq!(rendered.meta.content_length, Some(5));
    }

    #[test]
    fn automatic_head_drains_unknown_length_stream() {
        let mut remaining = 10usize;
        let producer = Producer::Stream(Box::new(move |buf: &mut [u8]| {
            let n = remaining.min(buf.len()).min(4);
            remaining -= n;
            Ok(n)
        }));
        let meta = ResponseMeta::with_status(200);
        let rendered = render(producer, meta, true, None).unwrap();
        assert_eq!(rendered.meta.content_length, Some(10));
    }
}
