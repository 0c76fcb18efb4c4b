use thiserror::Error;

use crate::arbitrage::EvalError;
use crate::orderbook::BookError;
use crate::sync::SyncError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Order book error: {0}")]
    Book(#[from] BookError),

    #[error("Reconciliation error: {0}")]
    Sync(#[from] SyncError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),
}
