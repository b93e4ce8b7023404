pub mod http;
pub mod limited;
pub mod limiter;
pub mod mock;
pub mod offline;

pub use http::{HttpBackend, HttpConfig};
pub use limited::LimitedBackend;
pub use limiter::{LimiterConfig, LimiterPermit, RateLimiter};
pub use mock::{MockBackend, MockReply};
pub use offline::OfflineBackend;
