pub mod engine;
pub mod range;
pub mod throttle;

pub use engine::{NO_STORE, StreamError, StreamRequest, StreamingEngine};
pub use range::parse_range;
pub use throttle::Throttle;
