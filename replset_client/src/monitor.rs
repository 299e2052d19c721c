mod monitor_actor;
mod monitor_error;
mod monitor_handle;
mod monitor_helpers;

pub(crate) use monitor_actor::*;
pub use monitor_error::*;
pub use monitor_handle::*;
pub use monitor_helpers::*;
