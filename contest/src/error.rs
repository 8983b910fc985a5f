use thiserror::Error;

/// Infrastructure-level failures shared by the server and the worker.
///
/// Domain failures (bad OTP code, rate limits, invalid tokens) are not
/// represented here; the server maps those to HTTP statuses itself and the
/// worker routes job failures through the broker retry policy.
#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("hash error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("sms delivery error: {0}")]
    Sms(String),

    #[error("malformed prediction payload for submission {0}")]
    MalformedPayload(uuid::Uuid),

    #[error("job exceeded the {0}s wall-clock limit")]
    JobTimeout(u64),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
