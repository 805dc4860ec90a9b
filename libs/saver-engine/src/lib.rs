pub mod bootstrap;
pub mod bucket;
pub mod buffer;
pub mod config;
pub mod error;
pub mod filename;
pub mod flush;
pub mod orderbook;
pub mod periodic;
pub mod quota;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod writer;

pub use bootstrap::Saver;
pub use config::SaverConfig;
pub use error::EngineError;
