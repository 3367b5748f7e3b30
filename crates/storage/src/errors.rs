pub(crate) use odp_domain::storage::StorageError;

/// Stored JSON that no longer decodes into its domain type.
pub(crate) fn corrupt(what: &str, err: serde_json::Error) -> StorageError {
    StorageError::Corrupt(format!("{what}: {err}"))
}
