//! Per-user sessions with the privileged filesystem helper.
//!
//! A [`Session`] owns one helper process running as a user's unix identity
//! and serializes commands over its standard streams. [`NativeFs`] maps
//! filesystem operations onto helper commands, and [`SessionManager`] keeps
//! one session per active user for async callers.

pub mod config;
pub mod error;
pub mod identity;
pub mod manager;
pub mod nativefs;
pub mod ownership;
pub mod paths;
pub mod session;

pub use config::{BridgeConfig, HelperConfig, SessionsConfig, UserEntry};
pub use error::{BridgeError, FsError, FsResult, Result};
pub use identity::{UnixIdentity, UserTable};
pub use manager::SessionManager;
pub use nativefs::{AclEntity, MovedItem, NativeFs};
pub use ownership::{CreatorSource, OwnershipCache};
pub use paths::PathTranslator;
pub use session::{BoundaryPair, CacheKey, CommandStreams, FrameReader, Session, SessionCache};

pub use fsbridge_protocol as protocol;
