//! Byte-pattern detection on a freshly accepted stream, used to tell
//! HTTP/1.x and HTTP/2 connections apart before handing off to the right
//! framing.

use std::{io, io::Cursor};

use monoio::{
    buf::IoBufMut,
    io::{AsyncReadRent, PrefixedReadIo},
};
use service_async::Service;

/// Detects a pattern in the input stream, returning it alongside an I/O
/// wrapper that replays whatever prefix bytes were consumed while detecting.
pub trait Detect<IO> {
    type DetOut;
    type IOOut;

    fn detect(&self, io: IO) -> impl std::future::Future<Output = io::Result<(Self::DetOut, Self::IOOut)>>;
}

/// Runs a [`Detect`] ahead of an inner service, forwarding the detected
/// value and the replayable stream.
pub struct DetectService<D, S> {
    pub detector: D,
    pub inner: S,
}

#[derive(thiserror::Error, Debug)]
pub enum DetectError<E> {
    #[error("service error: {0:?}")]
    Svc(E),
    #[error("io error: {0:?}")]
    Io(std::io::Error),
}

impl<R, S, D, CX> Service<(R, CX)> for DetectService<D, S>
where
    D: Detect<R>,
    S: Service<(D::DetOut, D::IOOut, CX)>,
{
    type Response = S::Response;
    type Error = DetectError<S::Error>;

    async fn call(&self, (io, cx): (R, CX)) -> Result<Self::Response, Self::Error> {
        let (det, io) = self.detector.detect(io).await.map_err(DetectError::Io)?;
        self.inner
            .call((det, io, cx))
            .await
            .map_err(DetectError::Svc)
    }
}

/// Detects a fixed byte prefix, recording whether it matched.
pub struct PrefixDetector(pub &'static [u8]);

impl<IO> Detect<IO> for PrefixDetector
where
    IO: AsyncReadRent,
{
    type DetOut = bool;
    type IOOut = PrefixedReadIo<IO, Cursor<Vec<u8>>>;

    async fn detect(&self, mut io: IO) -> io::Result<(Self::DetOut, Self::IOOut)> {
        let l = self.0.len();
        let mut written = 0;
        let mut buf: Vec<u8> = Vec::with_capacity(l);
        let mut eq = true;
        loop {
            // Safety: buf always has room for `l - written` more bytes.
            let buf_slice = unsafe { buf.slice_mut_unchecked(written..l) };
            let (result, buf_slice) = io.read(buf_slice).await;
            buf = buf_slice.into_inner();
            match result? {
                0 => break,
                n => {
                    let curr = written;
                    written += n;
                    if self.0[curr..written] != buf[curr..written] {
                        eq = false;
                        break;
                    }
                }
            }
        }
        let io = PrefixedReadIo::new(io, Cursor::new(buf));
        Ok((eq && written == l, io))
    }
}
