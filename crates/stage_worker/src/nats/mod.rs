mod log_sink;
mod message_publisher;
mod stage_processor;

pub use log_sink::*;
pub use message_publisher::*;
pub use stage_processor::*;
