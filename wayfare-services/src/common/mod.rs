//! Generic connection-handling services shared by every transport binding:
//! protocol detection and context insertion.

mod context;
mod detect;

pub use context::ContextService;
pub use detect::{Detect, DetectError, DetectService, PrefixDetector};
