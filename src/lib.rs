pub mod error;
pub mod instrument;
pub mod poll;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod transport;

// Re-export the primary types so users can depend on the crate
// without knowing the internal module layout.
pub use error::{Error, Result};
pub use instrument::*;
pub use poll::CompletionPoll;
pub use transport::{Connector, GpibAddress, Transport, Vxi11Gateway};
