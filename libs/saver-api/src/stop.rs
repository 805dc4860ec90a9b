use std::future::Future;
use std::pin::Pin;

use crate::error::SaverError;

/// A component that takes part in ordered shutdown.
///
/// `stop()` must not return until the component has fully stopped:
/// the shutdown coordinator moves to the next priority tier only after
/// every stop in the current tier has completed.
pub trait Stoppable: Send + Sync {
    /// Name used in shutdown logs.
    fn name(&self) -> &str;

    /// Stop the component. Errors are logged by the coordinator, never escalated.
    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<(), SaverError>> + Send + '_>>;
}
