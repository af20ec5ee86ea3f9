//! Finds standing offers that would immediately satisfy a new one.

use std::collections::BTreeSet;

use tracing::debug;

use crate::{
    error::ExchangeError,
    models::{Exchange, GroupId, Offer, OfferWithGroups},
    repository::OfferRepository,
};

/// The group a prospective offer gives up and the groups it would take instead.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub offered_group: GroupId,
    pub requested_groups: BTreeSet<GroupId>,
}

impl Candidate {
    /// An open offer matches when each side offers a group the other requests.
    pub fn is_matched_by(&self, offer: &Offer) -> bool {
        offer.is_open()
            && self.requested_groups.contains(&offer.offered_group)
            && offer.requested_groups.contains(&self.offered_group)
    }
}

/// Every open offer in `exchange` that `candidate` could be swapped with right away.
pub async fn find_matches(
    offers: &OfferRepository,
    exchange: &Exchange,
    candidate: &Candidate,
) -> Result<Vec<OfferWithGroups>, ExchangeError> {
    let matches = offers
        .find_matching_offers(
            exchange.id,
            candidate.offered_group,
            &candidate.requested_groups,
        )
        .await?
        .into_iter()
        .filter(|found| candidate.is_matched_by(&found.offer))
        .collect::<Vec<_>>();

    debug!(
        "Found {} matches for {:?} in exchange {:?}",
        matches.len(),
        candidate,
        exchange.id
    );

    Ok(matches)
}
