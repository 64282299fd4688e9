#![feature(impl_trait_in_assoc_type)]

//! Transport bindings for the Wayfare framework: TLS termination, HTTP/1.1
//! and HTTP/2 framing over `monoio-http`, and the service that ties a
//! decoded request to `wayfare_core::http::begin_request` and back out
//! again. TCP/UDS listener unification and worker-pool lifecycle live in
//! `wayfare_core` (`listener`, `server`); this crate only speaks to the
//! bytes once a connection has been accepted.

pub mod common;
pub mod http;
pub mod tls;
