#[derive(thiserror::Error, Debug)]
pub enum UpdateError {
    #[error("registry request failed")]
    Http(#[from] reqwest::Error),
    #[error("unexpected registry response: {0}")]
    Parse(String),
    #[error("registry requires an api key")]
    MissingAuth,
}
