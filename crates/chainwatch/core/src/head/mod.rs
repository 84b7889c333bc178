//! Head tracking: listening, persisting, reconciling and broadcasting chain heads.

mod broadcaster;
pub use broadcaster::{
    DEFAULT_CALLBACK_TIMEOUT, HeadBroadcastable, HeadBroadcaster, HeadTrackable, Unsubscriber,
};

mod error;
pub use error::{BackfillError, HeadListenerError, HeadTrackerError};

mod listener;
pub use listener::{HeadHandler, HeadListener};

mod metrics;
pub(crate) use metrics::Metrics;

mod saver;
pub use saver::HeadSaver;

mod tracker;
pub use tracker::HeadTracker;
