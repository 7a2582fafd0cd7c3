mod error;

pub use error::{http_error, ErrorKind};

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, ErrorKind>;
