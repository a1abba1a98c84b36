//! Result type definition and extension traits.

use crate::error::Error;

/// The standard Result type for kubemirror core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for results of store reads.
pub trait ResultExt<T> {
    /// Turn a `NotFound` error into `Ok(None)`.
    ///
    /// Absence is an observed state for the engine, not a failure.
    fn found(self) -> Result<Option<T>>;
}

impl<T> ResultExt<T> for Result<T> {
    fn found(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectKey, ResourceType};

    #[test]
    fn test_found_maps_not_found_to_none() {
        let missing: Result<u32> = Err(Error::not_found(
            &ResourceType::secret(),
            &ObjectKey::new("ns", "name"),
        ));
        assert_eq!(missing.found(), Ok(None));

        let present: Result<u32> = Ok(7);
        assert_eq!(present.found(), Ok(Some(7)));

        let failed: Result<u32> = Err(Error::unavailable("down"));
        assert!(failed.found().is_err());
    }
}
