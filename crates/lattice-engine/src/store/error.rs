/// Errors raised by the state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A reducer is already registered for this domain.
    #[error("reducer already registered for domain `{0}`")]
    DuplicateDomain(String),

    /// The stored envelope could not be parsed.
    ///
    /// `restore_state` treats this as absence rather than failing.
    #[error("persisted state is malformed: {0}")]
    MalformedPersistedState(#[source] serde_json::Error),

    /// The envelope could not be serialized.
    #[error("failed to serialize persisted state: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The persistence adapter reported a failure.
    #[error("persistence adapter failed: {0:#}")]
    Storage(anyhow::Error),
}
