pub mod config;
pub mod http_error;
pub mod kernel;
pub mod plugins;
pub mod store;

pub use crate::kernel::*;
pub use crate::store::*;
