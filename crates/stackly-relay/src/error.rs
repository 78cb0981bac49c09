#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay connection failed: {0}")]
    Connect(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("subscriber lagged, {0} messages skipped")]
    Lagged(u64),

    #[error("undecodable payload: {0}")]
    Malformed(String),

    #[error("failed to encode event: {0}")]
    Encode(String),
}
