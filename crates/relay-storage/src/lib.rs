// Postgres storage layer with sqlx

pub mod encryption;
pub mod error;
pub mod models;
pub mod remote_resolver;
pub mod repositories;

pub use encryption::{generate_encryption_key, EncryptedPayload, EncryptionService};
pub use error::{Error, Result};
pub use models::*;
pub use remote_resolver::DbRemoteServerResolver;
pub use repositories::*;
