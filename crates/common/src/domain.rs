mod context;
mod envelope;
mod event;
mod log_entry;
mod processed_check;
mod publisher;
mod result;

pub use context::*;
pub use envelope::*;
pub use event::*;
pub use log_entry::*;
pub use processed_check::*;
pub use publisher::*;
pub use result::*;
