//! Gatepass Directory
//!
//! Implementations of the identity resolver and the registration sink:
//! an in-memory directory for tests and demos, a SQLite store that also
//! handles the card binding workflow, and HTTP clients for a remote
//! gatepass directory server.

pub mod error;
pub mod memory;
pub mod remote;
pub mod sqlite;
pub mod wire;

pub use error::{DirectoryError, DirectoryResult};
pub use memory::InMemoryDirectory;
pub use remote::{HttpDirectory, HttpRegistrationSink, DEFAULT_TIMEOUT};
pub use sqlite::{SqliteDirectory, STAFF_DEFAULT_LABEL};
