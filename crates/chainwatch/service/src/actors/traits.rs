use async_trait::async_trait;

/// A long running task of the service.
#[async_trait]
pub trait ChainwatchActor {
    /// The error the actor stops with.
    type Error: std::fmt::Debug;

    /// Runs the actor until it is cancelled or fails.
    async fn start(self) -> Result<(), Self::Error>;
}
