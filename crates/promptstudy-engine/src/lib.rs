pub mod backend;
pub mod bridge;
pub mod config;
pub mod controller;
pub mod detached;
pub mod dispatcher;
pub mod error;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{HttpBackend, StudyBackend};
pub use bridge::{AiBridge, ChatOptions, ChatTurn, OpenAiBridge, UnavailableBridge};
pub use config::StudyConfig;
pub use controller::{PendingSend, SendRejection, SendState, SessionController, SubmitOutcome};
pub use detached::{Detached, SideCallFailure, SideCallKind};
pub use dispatcher::{DispatchReply, DispatchRequest, ProviderDispatcher};
pub use error::{BackendFailure, DispatchError};
pub use session::{Participant, SessionContext};
