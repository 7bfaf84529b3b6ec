pub mod error;
pub mod utils;

pub use error::Error;
pub use utils::{get_repo, FromPretrainedParameters, Repository};

/// A type alias for `Result<T, Error>` for the `unmasker` crate.
pub type Result<T> = std::result::Result<T, Error>;
