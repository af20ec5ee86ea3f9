use thiserror::Error;
use time::{format_description::well_known::Iso8601, OffsetDateTime};

use crate::models::{
    types::UtcDateTime, CourseId, ExchangeId, GroupId, OfferId, OfferState, UserId,
};

pub trait DBConvertible: Sized {
    type DBType;

    fn to_db(&self) -> Result<Self::DBType, DBToConversionError>;

    fn from_db(value: &Self::DBType) -> Result<Self, DBFromConversionError>;
}

#[derive(Debug, Error)]
pub enum DBFromConversionError {
    #[error("Failed to parse datetime: {0}")]
    DateTime(#[from] time::error::Parse),
    #[error("Invalid number: {0}")]
    InvalidNumber(i64),
    #[error("Offer accepted by {accepted_by:?} has no accepted group")]
    InconsistentOfferState { accepted_by: i64 },
}

#[derive(Debug, Error)]
pub enum DBToConversionError {
    #[error("Failed to format datetime")]
    DateTime(#[from] time::error::Format),
    #[error("Id {0} does not fit into a database integer")]
    IdOutOfRange(u64),
}

impl DBConvertible for UtcDateTime {
    type DBType = String;

    fn to_db(&self) -> Result<Self::DBType, DBToConversionError> {
        let string = OffsetDateTime::from(*self).format(&Iso8601::DEFAULT)?;
        Ok(string)
    }

    fn from_db(db_value: &Self::DBType) -> Result<Self, DBFromConversionError> {
        let datetime = OffsetDateTime::parse(db_value, &Iso8601::DEFAULT)?;
        Ok(UtcDateTime::from(datetime))
    }
}

macro_rules! id_conversion {
    ($($id:ident),* $(,)?) => {
        $(
            impl DBConvertible for $id {
                type DBType = i64;

                fn to_db(&self) -> Result<Self::DBType, DBToConversionError> {
                    i64::try_from(self.0).map_err(|_| DBToConversionError::IdOutOfRange(self.0))
                }

                fn from_db(value: &Self::DBType) -> Result<Self, DBFromConversionError> {
                    u64::try_from(*value)
                        .map($id)
                        .map_err(|_| DBFromConversionError::InvalidNumber(*value))
                }
            }
        )*
    };
}

id_conversion!(ExchangeId, OfferId, GroupId, UserId, CourseId);

/// Stored as the `(accepted_by, accepted_group)` column pair, both NULL while open.
impl DBConvertible for OfferState {
    type DBType = (Option<i64>, Option<i64>);

    fn to_db(&self) -> Result<Self::DBType, DBToConversionError> {
        Ok(match self {
            OfferState::Open => (None, None),
            OfferState::Accepted { by, accepted_group } => {
                (Some(by.to_db()?), Some(accepted_group.to_db()?))
            }
        })
    }

    fn from_db(value: &Self::DBType) -> Result<Self, DBFromConversionError> {
        match value {
            (None, _) => Ok(OfferState::Open),
            (Some(by), Some(group)) => Ok(OfferState::Accepted {
                by: UserId::from_db(by)?,
                accepted_group: GroupId::from_db(group)?,
            }),
            (Some(by), None) => Err(DBFromConversionError::InconsistentOfferState {
                accepted_by: *by,
            }),
        }
    }
}

impl DBConvertible for u32 {
    type DBType = i64;

    fn to_db(&self) -> Result<Self::DBType, DBToConversionError> {
        Ok(*self as _)
    }

    fn from_db(value: &Self::DBType) -> Result<Self, DBFromConversionError> {
        u32::try_from(*value).map_err(|_| DBFromConversionError::InvalidNumber(*value))
    }
}
