/// quietbox library crate: the end-to-end encryption engine.
///
/// Every module is public so the CLI binary and the `tests/` integration
/// tests use the same API an embedding messaging client would.
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod integrity;
pub mod keys;
pub mod message;
pub mod record;
pub mod transport;
pub mod util;
pub mod vault;

pub use engine::E2eeEngine;
pub use error::{QuietboxError, Result};
