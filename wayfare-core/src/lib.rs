#![feature(impl_trait_in_assoc_type)]

//! Core abstractions for the Wayfare embeddable HTTP server framework.
//!
//! This crate owns the declarative routing/response-dispatch engine described
//! at the top of the workspace: the `Group`/`Declaration` builder tree, the
//! flattener that turns it into route-table entries, the structured
//! single-pass query matcher, the request-body intake state machine, the
//! response pipeline, the incident dispatcher and the static file resolver.
//! It also carries the runtime-agnostic plumbing (config loading, TLS
//! material, listener unification, worker pool) a real server needs but that
//! isn't specific to any one transport binding.
//!
//! Concrete transport bindings (HTTP/1.1 + HTTP/2 framing, TCP/UDS
//! listeners, TLS termination) live in `wayfare-services`.

#[macro_use]
mod error;
pub use error::{AnyError, AnyResult};

pub mod config;
pub mod context;
pub mod http;
pub mod listener;
pub mod route;
pub mod server;
pub mod tls;
pub mod util;
