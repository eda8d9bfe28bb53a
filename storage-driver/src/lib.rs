//! # Storage driver
//!
//! The port every storage backend implements: objects are addressed by a
//! bucket name and a relative key, and can be listed, read, replaced,
//! exclusively created and deleted.

mod driver;
mod error;

pub use driver::{validate_bucket, validate_location};
pub use driver::Driver;
pub use driver::Metadata;
pub use driver::Reader;
pub use driver::Writer;
pub use error::{StorageError, StorageErrorBuilder, StorageErrorKind};
