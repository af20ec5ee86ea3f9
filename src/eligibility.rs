//! Who may take part in an exchange and which offers a user may accept.

use std::collections::HashSet;

use tokio::sync::OnceCell;

use crate::{
    models::{Exchange, ExchangeId, GroupId, Offer, Role, UserId},
    repository::{GroupRepository, PlatformRepository},
};

/// Whether `user` may post and accept offers in `exchange`.
pub async fn is_eligible(
    exchange: &Exchange,
    user: UserId,
    platform: &PlatformRepository,
) -> Result<bool, anyhow::Error> {
    if !exchange.students_only {
        return Ok(true);
    }

    platform
        .user_has_role(exchange.course, user, Role::Student)
        .await
}

/// Whether `user`, currently in `user_groups`, could accept `offer`.
///
/// Authors can never accept their own offers.
pub fn is_acceptable(offer: &Offer, user: UserId, user_groups: &HashSet<GroupId>) -> bool {
    if offer.author == user {
        return false;
    }

    offer
        .requested_groups
        .iter()
        .any(|group| user_groups.contains(group))
}

/// Lookups memoized for the duration of a single request by one user.
///
/// Group memberships must be refreshed with [`RequestContext::invalidate`]
/// after anything that may have changed them.
#[derive(Debug)]
pub struct RequestContext {
    user: UserId,
    groups: OnceCell<HashSet<GroupId>>,
    eligibility: OnceCell<(ExchangeId, bool)>,
}

impl RequestContext {
    pub fn new(user: UserId) -> RequestContext {
        RequestContext {
            user,
            groups: OnceCell::new(),
            eligibility: OnceCell::new(),
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub async fn groups(&self, groups: &GroupRepository) -> Result<&HashSet<GroupId>, anyhow::Error> {
        self.groups
            .get_or_try_init(|| groups.groups_of(self.user))
            .await
    }

    pub async fn is_eligible(
        &self,
        exchange: &Exchange,
        platform: &PlatformRepository,
    ) -> Result<bool, anyhow::Error> {
        let (cached_for, eligible) = *self
            .eligibility
            .get_or_try_init(|| async {
                let eligible = is_eligible(exchange, self.user, platform).await?;
                Ok::<_, anyhow::Error>((exchange.id, eligible))
            })
            .await?;

        if cached_for == exchange.id {
            Ok(eligible)
        } else {
            is_eligible(exchange, self.user, platform).await
        }
    }

    pub async fn is_acceptable(
        &self,
        offer: &Offer,
        groups: &GroupRepository,
    ) -> Result<bool, anyhow::Error> {
        let user_groups = self.groups(groups).await?;
        Ok(is_acceptable(offer, self.user, user_groups))
    }

    /// Forgets the memoized group memberships. Roles do not change mid-request.
    pub fn invalidate(&mut self) {
        self.groups = OnceCell::new();
    }
}
