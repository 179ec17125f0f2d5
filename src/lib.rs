//! Per-connection request-driving engine for a closed/open-loop HTTP load
//! generator: a write-side scheduler and a read-side response dispatcher
//! sharing one operation queue, plus the distribution generators, stats
//! recorder, and protocol adapter they drive.

pub mod clock;
pub mod connection;
pub mod descriptor;
pub mod distributions;
pub mod error;
pub mod operation;
pub mod options;
pub mod protocol;
pub mod queue;
pub mod stats;

pub use connection::Connection;
pub use descriptor::OperationDescriptor;
pub use error::PacerError;
pub use options::Options;
pub use protocol::{HttpTransport, Transport};
