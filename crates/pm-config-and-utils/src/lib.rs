//! Configuration, filesystem paths and logging bootstrap shared by the
//! mcp-pm producer (hook) and consumer (watch) processes.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    BatchSettings, Config, RelaySettings, DEFAULT_API_URL, DEFAULT_LOG_LEVEL, DEFAULT_WS_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
