//! Remote service boundary: the transport trait, error codes and the
//! in-memory store.

pub mod error;
pub mod memory;
pub mod transport;

pub use error::ApiErrorCode;
pub use memory::MemoryTransport;
pub use transport::{SessionKeys, Transport};
