pub mod breaker_registry;
pub mod call_gateway;
pub mod circuit_breaker;
pub mod in_memory_lanes;
pub mod observability;
pub mod outcome_window;

pub use breaker_registry::*;
pub use call_gateway::*;
pub use circuit_breaker::*;
pub use in_memory_lanes::*;
pub use observability::*;
pub use outcome_window::*;
