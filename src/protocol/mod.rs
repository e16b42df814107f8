//! The wire data model of the collector protocol.

mod attachment;
mod envelope;
mod session;
mod types;

pub use attachment::*;
pub use envelope::*;
pub use session::*;
pub use types::*;
