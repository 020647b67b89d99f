mod dispatcher;
mod history;
mod logger;
mod null_strip;
mod stage;
mod stage_pipeline;
mod stage_runner;

pub use dispatcher::*;
pub use history::*;
pub use logger::*;
pub use null_strip::*;
pub use stage::*;
pub use stage_pipeline::*;
pub use stage_runner::*;
