use thiserror::Error;

use crate::{
    models::{types::UtcDateTime, ExchangeId, OfferId},
    repository::{DBFromConversionError, DBToConversionError},
};

/// Everything an exchange action can fail with.
///
/// All variants except [`ExchangeError::Storage`] are raised before any state
/// is mutated and carry a short message suitable for showing to the user.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Offer {0:?} does not exist. Maybe it was removed by its author.")]
    OfferNotFound(OfferId),

    #[error("Exchange {0:?} does not exist")]
    ExchangeNotFound(ExchangeId),

    #[error("This offer has already been accepted by someone else")]
    AlreadyAccepted,

    #[error("You cannot accept this offer: {0}")]
    NotAcceptable(String),

    #[error("Only students can take part in this exchange")]
    NotEligible,

    #[error("This exchange is not available until {opens_at}")]
    NotOpenYet { opens_at: UtcDateTime },

    #[error("This exchange was closed on {closed_at}")]
    Closed { closed_at: UtcDateTime },

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl ExchangeError {
    pub fn is_user_error(&self) -> bool {
        !matches!(self, ExchangeError::Storage(_))
    }
}

pub(crate) fn validation_err(field: &'static str, message: impl Into<String>) -> ExchangeError {
    ExchangeError::Validation {
        field,
        message: message.into(),
    }
}

pub(crate) fn not_acceptable(reason: impl Into<String>) -> ExchangeError {
    ExchangeError::NotAcceptable(reason.into())
}

impl From<anyhow::Error> for ExchangeError {
    fn from(value: anyhow::Error) -> Self {
        ExchangeError::Storage(value)
    }
}

impl From<sqlx::Error> for ExchangeError {
    fn from(value: sqlx::Error) -> Self {
        ExchangeError::Storage(value.into())
    }
}

impl From<DBFromConversionError> for ExchangeError {
    fn from(value: DBFromConversionError) -> Self {
        ExchangeError::Storage(value.into())
    }
}

impl From<DBToConversionError> for ExchangeError {
    fn from(value: DBToConversionError) -> Self {
        ExchangeError::Storage(value.into())
    }
}
