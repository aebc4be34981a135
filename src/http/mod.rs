pub mod metrics;
pub mod stream;
pub mod transport;

pub use metrics::{RequestRecord, TransferMetrics};
pub use stream::{RangeStream, StreamConfig};
pub use transport::{HttpTransport, RangeResponse, Transport};
