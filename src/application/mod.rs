pub mod discovery;
pub mod pipeline;
