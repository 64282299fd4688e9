//! HTTP transport binding: the channel adapter that turns bytes on a
//! `wayfare_core::listener::Listener` stream into calls against
//! `wayfare_core::http::begin_request`, plus the version-detection layer
//! that lets one endpoint serve both HTTP/1.x and HTTP/2.

pub mod core;
pub mod detect;

pub use self::{
    core::{HttpCoreService, HttpCoreServiceFactory, HttpServerTimeout},
    detect::H2Detect,
};
