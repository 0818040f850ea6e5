pub mod config;
pub mod error;
pub mod types;

pub use config::{CbsonConfig, CodecConfig, LogConfig};
pub use error::{CommonError, CommonResult};
pub use types::ObjectId;
