//! Per-connection / per-request context carried alongside a request as it
//! flows down the service stack.
//!
//! The group context described in spec §3 ("accumulated tuple... produced
//! by flattening; immutable once a route is registered") is split in two
//! halves here: the *static* half (host set, method set, body limit,
//! incident handlers) lives on the matched [`crate::route::Declaration`]
//! itself, while this module defines the *dynamic* half — values only known
//! once a connection actually arrives (peer address) — using
//! `certain_map`'s compile-time-checked context map, the same mechanism the
//! teacher codebase uses to thread per-connection state through a service
//! stack without a `HashMap` lookup on every request.

use derive_more::{From, Into};

use crate::listener::AcceptedAddr;

#[derive(From, Into, Debug, Clone)]
pub struct PeerAddr(pub AcceptedAddr);

#[derive(From, Into, Debug, Clone)]
pub struct RemoteAddr(pub AcceptedAddr);

certain_map::certain_map! {
    #[derive(Debug, Clone)]
    #[default(EmptyContext)]
    pub struct Context {
        // Set by ContextService when a connection is accepted.
        peer_addr: PeerAddr,
        // Left for an embedding application to populate (e.g. from a
        // trusted proxy header) ahead of a handler running; unset otherwise.
        remote_addr: Option<RemoteAddr>,
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use certain_map::ParamSet;
    use service_async::ParamRef;

    use super::*;
    use crate::listener::AcceptedAddr;

    #[test]
    fn add_entries_to_context() {
        let ctx = EmptyContext::new();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let ctx = ctx.param_set(PeerAddr(AcceptedAddr::Tcp(addr)));
        let got: &PeerAddr = ctx.param_ref();
        match &got.0 {
            AcceptedAddr::Tcp(a) => assert_eq!(*a, addr),
            #[allow(unreachable_patterns)]
            _ => panic!("unexpected variant"),
        }
    }
}
