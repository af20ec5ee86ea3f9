//! Display order of offer listings.

use std::{cmp::Ordering, collections::HashSet};

use crate::{
    eligibility::is_acceptable,
    models::{GroupId, Offer, UserId},
};

/// Orders the viewer's own offers first, then offers the viewer can accept,
/// then everything else. Oldest first within each tier.
pub fn compare_offers(
    a: &Offer,
    b: &Offer,
    viewer: UserId,
    viewer_groups: &HashSet<GroupId>,
) -> Ordering {
    let a_own = a.author == viewer;
    let b_own = b.author == viewer;

    b_own
        .cmp(&a_own)
        .then_with(|| {
            let a_acceptable = is_acceptable(a, viewer, viewer_groups);
            let b_acceptable = is_acceptable(b, viewer, viewer_groups);
            b_acceptable.cmp(&a_acceptable)
        })
        .then_with(|| a.submitted_at.cmp(&b.submitted_at))
}

/// Stable sort of `offers` for display to `viewer`.
pub fn sort<T: AsRef<Offer>>(offers: &mut [T], viewer: UserId, viewer_groups: &HashSet<GroupId>) {
    offers.sort_by(|a, b| compare_offers(a.as_ref(), b.as_ref(), viewer, viewer_groups));
}
