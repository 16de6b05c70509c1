//! PTY session layer: one shell process per connection, a drain actor per
//! shell, and the registry that binds connections to sessions.

pub mod pty;
pub mod registry;
pub mod sanitize;

pub use pty::{PtySession, SessionError, ShellSpec};
pub use registry::{ConnectionId, RegistryError, SessionRegistry};
