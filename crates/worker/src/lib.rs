pub mod consumer;
pub mod trigger;
