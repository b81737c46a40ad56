//! Describes the errors reported by [Group::get](crate::group::Group::get).
//!
//! As all tasks which wait for the same key receive the very same outcome, a [CacheError] is
//! **Clone**. Therefore errors reported by a [Loader](crate::group::Loader) are kept within an
//! **Arc**.
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Enumerates the possible failures of a cache lookup.
#[derive(Clone, Debug)]
pub enum CacheError {
    /// Signals that an empty key was requested.
    InvalidKey,

    /// Signals that the loader of the group failed to compute the value.
    Loader(Arc<anyhow::Error>),
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::InvalidKey => write!(f, "key is required"),
            CacheError::Loader(error) => write!(f, "{:#}", error),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<anyhow::Error> for CacheError {
    fn from(error: anyhow::Error) -> Self {
        CacheError::Loader(Arc::new(error))
    }
}
