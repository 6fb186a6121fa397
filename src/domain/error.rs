//! Domain error types.
//!
//! Errors fall into two classes. Data-insufficiency errors (`NotEnoughData`,
//! `MissingCandlestick`, `MissingBucket`, `EmptyInput`) mean "try again once
//! more history exists" and are treated as skip-this-tick by the trading
//! state machine and the backtester. Everything else is a hard failure that
//! is propagated with context.

use chrono::{DateTime, Utc};

/// Top-level error type for tradecore.
#[derive(Debug, thiserror::Error)]
pub enum TraderError {
    #[error("not enough data")]
    NotEnoughData,

    #[error("a candlestick is missing")]
    MissingCandlestick,

    #[error("missing candlestick builder for bucket {bucket}")]
    MissingBucket { bucket: DateTime<Utc> },

    #[error("no candles provided")]
    EmptyInput,

    #[error("backend error: {reason}")]
    Backend { reason: String },

    #[error("exchange error: {reason}")]
    Exchange { reason: String },

    #[error("unknown strategy kind: {kind}")]
    UnknownStrategyKind { kind: String },

    #[error("invalid {kind} strategy data: {reason}")]
    StrategyData { kind: String, reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("report error: {reason}")]
    Report { reason: String },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<TraderError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TraderError {
    /// Wrap this error with a description of the operation that failed.
    pub fn context(self, context: impl Into<String>) -> Self {
        TraderError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with every context layer peeled off.
    pub fn root(&self) -> &TraderError {
        match self {
            TraderError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for errors that only mean more history is needed.
    pub fn is_data_insufficiency(&self) -> bool {
        matches!(
            self.root(),
            TraderError::NotEnoughData
                | TraderError::MissingCandlestick
                | TraderError::MissingBucket { .. }
                | TraderError::EmptyInput
        )
    }
}

/// Attach context to the error side of a `Result`.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, TraderError>;
}

impl<T> ResultExt<T> for Result<T, TraderError> {
    fn context(self, context: impl Into<String>) -> Result<T, TraderError> {
        self.map_err(|e| e.context(context))
    }
}

impl From<&TraderError> for std::process::ExitCode {
    fn from(err: &TraderError) -> Self {
        let code: u8 = match err.root() {
            TraderError::Io(_) => 1,
            TraderError::ConfigParse { .. }
            | TraderError::ConfigMissing { .. }
            | TraderError::ConfigInvalid { .. } => 2,
            TraderError::Backend { .. } | TraderError::Exchange { .. } => 3,
            TraderError::UnknownStrategyKind { .. } | TraderError::StrategyData { .. } => 4,
            TraderError::NotEnoughData
            | TraderError::MissingCandlestick
            | TraderError::MissingBucket { .. }
            | TraderError::EmptyInput => 5,
            TraderError::Report { .. } => 6,
            // root() never returns a Context layer
            TraderError::Context { .. } => 1,
        };
        std::process::ExitCode::from(code)
    }
}
