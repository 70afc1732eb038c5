pub mod forwarder;
pub mod fsm;
pub mod resolver;

pub use forwarder::{DataSink, Forwarder, ForwarderFactory};
pub use resolver::Resolver;
