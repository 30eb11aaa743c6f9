pub mod driver;
pub mod model;
pub mod signature;

pub use driver::{DebitSpec, GatewayDriver, GatewayError};
pub use model::{EventKind, GatewayEvent, IntentId, IntentState, IntentStatus, TransferId};
pub use signature::SignatureError;
