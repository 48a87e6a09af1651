//! Agent Loop
//!
//! The conversation loop and the pieces it is built from: the frontend seam,
//! confirmation-aware dispatch, slash directives and the session context.

pub mod core;
pub mod directive;
pub mod dispatch;
pub mod frontend;
pub mod session;

pub use core::{AgentCore, AgentSettings, TurnReport};
pub use directive::Directive;
pub use dispatch::ToolDispatcher;
pub use frontend::{AgentEvent, ConfirmRequest, Decision, Frontend, PlannedStep};
pub use session::{Resume, SessionContext};
