pub mod connections;
pub mod publisher;

pub use connections::{ConnectionManager, OriginMatcher};
pub use publisher::{EventFanout, EventPublisher};
