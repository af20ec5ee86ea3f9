mod exchange;
mod offer;
mod platform;

pub mod types;

pub use exchange::{Availability, Exchange, ExchangeId, NewExchange, TimeWindow};
pub use offer::{NewOffer, Offer, OfferId, OfferState, OfferStatus, OfferWithGroups};
pub use platform::{Course, CourseId, Group, GroupId, Role, User, UserId};
