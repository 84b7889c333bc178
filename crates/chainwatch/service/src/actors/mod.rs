//! [ChainwatchActor] tasks run by the service.
//!
//! [ChainwatchActor]: super::ChainwatchActor

mod traits;
pub use traits::ChainwatchActor;

mod metric;
pub use metric::MetricWorker;

mod tracker;
pub use tracker::HeadTrackerActor;
