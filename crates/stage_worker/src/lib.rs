pub mod domain;
pub mod nats;
pub mod stage_worker;

pub use domain::*;
pub use nats::*;
pub use stage_worker::*;
