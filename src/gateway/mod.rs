//! MCP gateway: session gate, request handling and transports

pub mod handler;
mod helpers;
mod router;
mod server;
pub mod session;
pub mod stdio;

pub use handler::{Dispatch, TOOLS_LIST_CHANGED};
pub use helpers::SERVER_NAME;
pub use router::{AppState, SESSION_HEADER, create_router};
pub use server::Gateway;
pub use session::{AuthGate, CallOutcome, Session, SessionState};
