use std::collections::BTreeSet;

use super::{
    exchange::ExchangeId,
    platform::{Group, GroupId, User, UserId},
    types::UtcDateTime,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OfferId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferState {
    Open,
    Accepted { by: UserId, accepted_group: GroupId },
}

/// State filter for offer listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferStatus {
    Open,
    Accepted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Offer {
    pub id: OfferId,
    pub exchange_id: ExchangeId,
    pub author: UserId,
    pub offered_group: GroupId,
    pub requested_groups: BTreeSet<GroupId>,
    pub submitted_at: UtcDateTime,
    pub state: OfferState,
}

impl Offer {
    pub fn is_open(&self) -> bool {
        self.state == OfferState::Open
    }
}

impl AsRef<Offer> for Offer {
    fn as_ref(&self) -> &Offer {
        self
    }
}

#[derive(Clone, Debug)]
pub struct NewOffer {
    pub exchange_id: ExchangeId,
    pub author: UserId,
    pub offered_group: GroupId,
    pub requested_groups: BTreeSet<GroupId>,
    pub submitted_at: UtcDateTime,
}

/// An offer together with the records needed to display it.
#[derive(Clone, Debug)]
pub struct OfferWithGroups {
    pub offer: Offer,
    pub author: User,
    pub offered_group: Group,
    /// Sorted by group name.
    pub requested_groups: Vec<Group>,
}

impl AsRef<Offer> for OfferWithGroups {
    fn as_ref(&self) -> &Offer {
        &self.offer
    }
}
