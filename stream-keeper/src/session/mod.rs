//! Capture sessions and the effects they drive.
//!
//! A [`Session`] binds one live capture to the side tasks that run alongside
//! it (chat logger, metadata gatherer). All of them share one [`TaskScope`];
//! when the capture ends the scope is cancelled and joined before the session
//! reports [`SessionState::Ended`].

pub mod effects;
pub mod scope;
#[allow(clippy::module_inception)]
pub mod session;

pub use effects::{
    CaptureEngine, ChatLogger, LivenessChecker, MetadataGatherer, SessionContext, SessionEffects,
};
pub use scope::TaskScope;
pub use session::{Session, SessionReport, SessionState};
