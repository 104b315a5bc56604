pub mod config;
pub mod errors;
pub mod logging;
pub mod runtime;
pub mod session;
pub mod util;
