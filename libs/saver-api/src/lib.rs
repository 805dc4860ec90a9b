pub mod error;
pub mod format;
pub mod handler;
pub mod payload;
pub mod stop;

pub use error::{ErrorKind, SaverError};
pub use format::RecordFormatter;
pub use handler::PayloadHandler;
pub use payload::{PartitionKey, Payload};
pub use stop::Stoppable;
