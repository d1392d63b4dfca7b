use std::fmt;

use thiserror::Error;

/// An error that happens while serving a [`Query`](crate::Query).
///
/// This error is shared between every caller that waited on the same load, which is why it is
/// [`Clone`] and carries its details as plain strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The backing store failed with something other than a miss.
    #[error("store fault: {0}")]
    StoreFault(String),
    /// Neither the query nor the bucket registry provide a loader.
    #[error("loader not found for bucket `{bucket}`")]
    LoaderNotFound { bucket: String },
    /// A loader is registered for the bucket, but it produces a different type than requested.
    #[error("loader registered for bucket `{bucket}` produces a different type")]
    LoaderTypeMismatch { bucket: String },
    /// The loader returned an error.
    #[error("loader failed: {0}")]
    Loader(String),
    /// The loader panicked. The panic was caught at the loader boundary.
    #[error("loader panicked: {0}")]
    LoaderPanicked(String),
    /// There is no usable data to decode.
    #[error("data is nil")]
    DataIsNil,
    /// The codec rejected a value.
    #[error("encode failed: {0}")]
    Encode(String),
    /// The codec rejected the stored bytes.
    #[error("decode failed: {0}")]
    Decode(String),
    /// The caller stopped waiting for the operation.
    ///
    /// The operation itself may still complete in the background.
    #[error("operation cancelled")]
    Cancelled,
    /// An unexpected error inside the cache itself, like a load that vanished without
    /// producing a result.
    #[error("internal error")]
    InternalError,
}

impl CacheError {
    /// Converts a loader error, keeping the full context chain in the message.
    pub(crate) fn from_loader(err: anyhow::Error) -> Self {
        Self::Loader(format!("{err:#}"))
    }

    /// Converts a caught panic payload into a [`CacheError::LoaderPanicked`].
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "opaque panic payload".to_owned()
        };
        Self::LoaderPanicked(message)
    }

    /// A short, stable name used for metric tags.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::StoreFault(_) => "store_fault",
            Self::LoaderNotFound { .. } => "loader_not_found",
            Self::LoaderTypeMismatch { .. } => "loader_type_mismatch",
            Self::Loader(_) => "loader",
            Self::LoaderPanicked(_) => "loader_panicked",
            Self::DataIsNil => "data_is_nil",
            Self::Encode(_) => "encode",
            Self::Decode(_) => "decode",
            Self::Cancelled => "cancelled",
            Self::InternalError => "internal",
        }
    }
}

/// Either `Ok(T)` or the reason why the item could not be served.
pub type CacheEntry<T = ()> = Result<T, CacheError>;

/// The aggregate error of a batch read.
///
/// Holds one slot per requested query, positionally aligned with the input. A slot is `None`
/// when that query was served successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    errors: Vec<Option<CacheError>>,
}

impl BatchError {
    /// Returns `Some` if at least one slot failed.
    pub(crate) fn from_slots(errors: Vec<Option<CacheError>>) -> Option<Self> {
        errors
            .iter()
            .any(Option::is_some)
            .then_some(Self { errors })
    }

    /// All slots, positionally aligned with the requested queries.
    pub fn errors(&self) -> &[Option<CacheError>] {
        &self.errors
    }

    /// The first error in input order.
    pub fn first(&self) -> Option<&CacheError> {
        self.errors.iter().flatten().next()
    }

    /// The number of failed slots.
    pub fn failed(&self) -> usize {
        self.errors.iter().flatten().count()
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(first) = self.first() else {
            return write!(f, "no errors");
        };
        if !f.alternate() {
            return write!(f, "{first}");
        }

        writeln!(f, "{} of {} queries failed:", self.failed(), self.errors.len())?;
        for (index, err) in self.errors.iter().enumerate() {
            if let Some(err) = err {
                writeln!(f, "  {index}: {err}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}
