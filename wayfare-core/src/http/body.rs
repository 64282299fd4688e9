//! Request-body ingestion state machine (§4.4): `awaiting-head ->
//! awaiting-body -> complete | aborted`, with collect/reduce/ignore/decode
//! modes and limit enforcement. The automaton itself never suspends —
//! suspension, if any, is the transport adapter's job (§5).

use std::any::Any;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;

/// Why intake stopped before reaching `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    TooLarge,
    DecodeFailed,
    ClientClosed,
}

/// A reduce-mode accumulator, folded over by exclusive mutable reference —
/// no aliasing, matching the design note on shared accumulators.
pub trait Reducer: 'static {
    fn init(&self) -> Box<dyn Any>;
    fn fold(&self, acc: Box<dyn Any>, chunk: &[u8]) -> Box<dyn Any>;
}

struct FnReducer<A, F> {
    init: A,
    fold: F,
}

impl<A, F> Reducer for FnReducer<A, F>
where
    A: Clone + 'static,
    F: Fn(A, &[u8]) -> A + 'static,
{
    fn init(&self) -> Box<dyn Any> {
        Box::new(self.init.clone())
    }

    fn fold(&self, acc: Box<dyn Any>, chunk: &[u8]) -> Box<dyn Any> {
        let acc = *acc.downcast::<A>().expect("reducer accumulator type changed mid-intake");
        Box::new((self.fold)(acc, chunk))
    }
}

/// A JSON-decode mode, type-erased so [`Mode`] doesn't need to be generic.
pub trait JsonDecoder: 'static {
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Any>, serde_json::Error>;
}

struct TypedJsonDecoder<T>(std::marker::PhantomData<fn() -> T>);

impl<T: DeserializeOwned + 'static> JsonDecoder for TypedJsonDecoder<T> {
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Any>, serde_json::Error> {
        serde_json::from_slice::<T>(bytes).map(|v| Box::new(v) as Box<dyn Any>)
    }
}

/// The body-intake descriptor's mode (data model §3's "one of: none, data,
/// reduce, json-of(T), ignore").
pub enum Mode {
    None,
    Data,
    Reduce(Box<dyn Reducer>),
    JsonOf(Box<dyn JsonDecoder>),
    Ignore,
}

impl Mode {
    pub fn reduce<A, F>(init: A, fold: F) -> Self
    where
        A: Clone + 'static,
        F: Fn(A, &[u8]) -> A + 'static,
    {
        Mode::Reduce(Box::new(FnReducer { init, fold }))
    }

    pub fn json_of<T: DeserializeOwned + 'static>() -> Self {
        Mode::JsonOf(Box::new(TypedJsonDecoder::<T>(std::marker::PhantomData)))
    }
}

/// What a completed intake yielded. The caller downcasts `Reduced`/`Json`
/// using the same concrete type it built the [`Mode`] with.
pub enum Outcome {
    None,
    Data(Bytes),
    Reduced(Box<dyn Any>),
    Json(Box<dyn Any>),
    Unit,
}

enum State {
    AwaitingHead,
    AwaitingBody,
    Complete,
    Aborted(AbortReason),
}

/// One request's body-intake automaton.
pub struct BodyIntake {
    state: State,
    mode: Mode,
    limit: u64,
    received: u64,
    buf: BytesMut,
    acc: Option<Box<dyn Any>>,
}

impl BodyIntake {
    pub fn new(mode: Mode, declared_limit: u64, implicit_limit: u64) -> Self {
        let acc = match &mode {
            Mode::Reduce(reducer) => Some(reducer.init()),
            _ => None,
        };
        Self {
            state: State::AwaitingHead,
            mode,
            limit: declared_limit.min(implicit_limit),
            received: 0,
            buf: BytesMut::new(),
            acc,
        }
    }

    /// Transition on the request head: fold in `Content-Length` if present,
    /// aborting immediately if it already exceeds the effective limit.
    pub fn on_head(&mut self, content_length: Option<u64>) -> Result<(), AbortReason> {
        debug_assert!(matches!(self.state, State::AwaitingHead));
        if let Some(cl) = content_length {
            self.limit = self.limit.min(cl);
            if cl > self.limit {
                self.state = State::Aborted(AbortReason::TooLarge);
                return Err(AbortReason::TooLarge);
            }
        }
        self.state = State::AwaitingBody;
        Ok(())
    }

    pub fn on_chunk(&mut self, chunk: &[u8]) -> Result<(), AbortReason> {
        debug_assert!(matches!(self.state, State::AwaitingBody));
        self.received += chunk.len() as u64;
        if self.received > self.limit {
            self.state = State::Aborted(AbortReason::TooLarge);
            return Err(AbortReason::TooLarge);
        }
        match &self.mode {
            Mode::Data | Mode::JsonOf(_) => self.buf.extend_from_slice(chunk),
            Mode::Reduce(reducer) => {
                let acc = self.acc.take().expect("reduce accumulator missing");
                self.acc = Some(reducer.fold(acc, chunk));
            }
            Mode::Ignore | Mode::None => {}
        }
        Ok(())
    }

    /// Transition on end-of-body: mode-specific finalize.
    pub fn on_end(mut self) -> Result<Outcome, AbortReason> {
        match self.mode {
            Mode::None => {
                self.state = State::Complete;
                Ok(Outcome::None)
            }
            Mode::Data => {
                self.state = State::Complete;
                Ok(Outcome::Data(self.buf.freeze()))
            }
            Mode::Reduce(_) => {
                self.state = State::Complete;
                Ok(Outcome::Reduced(self.acc.expect("reduce accumulator missing")))
            }
            Mode::Ignore => {
                self.state = State::Complete;
                Ok(Outcome::Unit)
            }
            Mode::JsonOf(decoder) => match decoder.decode(&self.buf) {
                Ok(value) => {
                    self.state = State::Complete;
                    Ok(Outcome::Json(value))
                }
                Err(_) => {
                    self.state = State::Aborted(AbortReason::DecodeFailed);
                    Err(AbortReason::DecodeFailed)
                }
            },
        }
    }

    /// Transport reset or cancellation: no response is ever attempted for
    /// this intake.
    pub fn abort_client_closed(&mut self) {
        self.state = State::Aborted(AbortReason::ClientClosed);
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_over_limit_aborts_on_head() {
        let mut intake = BodyIntake::new(Mode::Data, 100, 1000);
        assert_eq!(intake.on_head(Some(200)), Err(AbortReason::TooLarge));
    }

    #[test]
    fn data_mode_collects_chunks_in_order() {
        let mut intake = BodyIntake::new(Mode::Data, 100, 1000);
        intake.on_head(Some(6)).unwrap();
        intake.on_chunk(b"ab").unwrap();
        intake.on_chunk(b"cdef").unwrap();
        match intake.on_end().unwrap() {
            Outcome::Data(bytes) => assert_eq!(&bytes[..], b"abcdef"),
            _ => panic!("expected Data outcome"),
        }
    }

    #[test]
    fn chunk_overflow_past_limit_aborts() {
        let mut intake = BodyIntake::new(Mode::Data, 4, 1000);
        intake.on_head(None).unwrap();
        intake.on_chunk(b"ab").unwrap();
        assert_eq!(intake.on_chunk(b"cde"), Err(AbortReason::TooLarge));
    }

    #[test]
    fn reduce_mode_folds_without_reordering() {
        let mut intake = BodyIntake::new(Mode::reduce(0u64, |acc, chunk| acc + chunk.len() as u64), 100, 1000);
        intake.on_head(None).unwrap();
        intake.on_chunk(b"abc").unwrap();
        intake.on_chunk(b"de").unwrap();
        match intake.on_end().unwrap() {
            Outcome::Reduced(total) => assert_eq!(*total.downcast::<u64>().unwrap(), 5),
            _ => panic!("expected Reduced outcome"),
        }
    }

    #[test]
    fn json_mode_decodes_on_end_and_fails_cleanly() {
        #[derive(serde::Deserialize)]
        struct Point {
            x: i32,
        }
        let mut intake = BodyIntake::new(Mode::json_of::<Point>(), 100, 1000);
        intake.on_head(None).unwrap();
        intake.on_chunk(br#"{"x": 7}"#).unwrap();
        match intake.on_end().unwrap() {
            Outcome::Json(v) => assert_eq!(v.downcast::<Point>().unwrap().x, 7),
            _ => panic!("expected Json outcome"),
        }

        let mut bad = BodyIntake::new(Mode::json_of::<Point>(), 100, 1000);
        bad.on_head(None).unwrap();
        bad.on_chunk(b"not json").unwrap();
        assert_eq!(bad.on_end().unwrap_err(), AbortReason::DecodeFailed);
    }

    #[test]
    fn ignore_mode_still_enforces_limit() {
        let mut intake = BodyIntake::new(Mode::Ignore, 2, 1000);
        intake.on_head(None).unwrap();
        assert_eq!(intake.on_chunk(b"abc"), Err(AbortReason::TooLarge));
    }
}
