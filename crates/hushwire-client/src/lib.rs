//! Hushwire Client - high-level protocol orchestration
//!
//! Coordinates the protocol core, local storage, and the directory/relay
//! collaborators: identity bootstrap, bundle publication, per-device
//! session management, envelope fan-out, and the background pull loop.

pub mod client;
pub mod directory;
pub mod error;
pub mod memory;
pub mod pull;
pub mod session;

pub use client::{ClientConfig, IncomingMessage, Messenger};
pub use directory::{Directory, EnvelopeId, ReceiptKind, Relay};
pub use error::{Error, Result};
pub use memory::{MemoryDirectory, MemoryRelay};
pub use pull::{spawn_pull_loop, PullHandle};
