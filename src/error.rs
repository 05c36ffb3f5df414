use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry document not found")]
    NotFound,
    #[error("registry document changed since it was read")]
    Conflict,
    #[error("unexpected registry status {0}")]
    Status(u16),
    #[error("registry http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("endpoint `{0}` is already taken")]
    HandleTaken(String),
    #[error("transport unsupported: {0}")]
    Unsupported(String),
    #[error("transport adapter error: {0}")]
    Adapter(String),
    #[error("transport is not open")]
    NotOpen,
    #[error("invalid peer address: {0}")]
    InvalidAddress(String),
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant disabled (no api key)")]
    Disabled,
    #[error("assistant http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected assistant status {0}")]
    Status(u16),
    #[error("assistant returned no text")]
    EmptyResponse,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("invalid login: {0} must not be empty")]
    InvalidLogin(&'static str),
    #[error("message text is empty")]
    EmptyMessage,
    #[error("unknown peer {0}")]
    UnknownPeer(String),
    #[error("handle `{0}` is already in use")]
    HandleTaken(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}
