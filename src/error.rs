use std::io;
use thiserror::Error;

/// type alias for all operations on a [`KvStore`] that could fail with a [`KvError`]
///
/// [`KvStore`]: crate::KvStore
pub type Result<T> = std::result::Result<T, KvError>;

/// Error variants used by [`KvStore`].
/// It wraps any lower level errors from third party crates
///
/// [`KvStore`]: crate::KvStore
#[derive(Error)]
pub enum KvError {
    /// variant for errors caused by std::io
    #[error("IO error")]
    Io {
        /// source of the IO Error
        #[from]
        source: io::Error,
    },

    /// variant for on-disk state that could not be decoded, typically a
    /// damaged or truncated snapshot image
    #[error("{}", .0)]
    Corruption(String),

    /// variant for a store lock poisoned by a panicking thread
    #[error("{}", .0)]
    Locking(String),
}

/// a custom Debug implementation that will write the entire error chain
impl std::fmt::Debug for KvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// writes the entire error chain of the given error `e`, to the formatter.
fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by: {}", cause)?;
        current = cause.source();
    }
    Ok(())
}
