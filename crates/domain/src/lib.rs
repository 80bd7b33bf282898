pub mod entities;
pub mod handlers;
pub mod lanes;
pub mod messaging;
pub mod publisher;

pub use courier_errors::{CourierError, CourierResult, FailureKind, HandlerFailure};
pub use entities::*;
pub use handlers::*;
pub use messaging::*;
pub use publisher::*;
