use std::future::Future;
use std::pin::Pin;

use crate::error::SaverError;
use crate::payload::Payload;

/// Ingestion entry point, called by the producer for every message.
///
/// - `Ok(())`: the payload is owned by the saver (buffered or written);
///   the producer may acknowledge it.
/// - `Err(_)`: the producer should redeliver or dead-letter the message.
///
/// Buffered implementations never block on disk I/O.
pub trait PayloadHandler: Send + Sync {
    fn process(
        &self,
        payload: Payload,
    ) -> Pin<Box<dyn Future<Output = Result<(), SaverError>> + Send + '_>>;
}
