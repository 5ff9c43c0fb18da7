pub mod config;
pub mod diagnostics;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod stream;
pub mod transport;

mod util;
