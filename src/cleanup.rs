//! Keeps exchange data consistent when the platform deletes groups or memberships.

use sqlx::{Pool, Sqlite};
use tracing::{error, info};

use crate::{
    models::{GroupId, OfferId, UserId},
    repository::{ExchangeRepository, OfferRepository},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub requested_groups_removed: u64,
    pub offers_removed: u64,
    pub available_groups_removed: u64,
}

/// Hooks for the group management host.
///
/// Each step runs on its own. A failing step is logged and does not stop or
/// undo the others; the first failure is returned once all steps ran.
#[derive(Debug, Clone)]
pub struct CascadeCleanup {
    offers: OfferRepository,
    exchanges: ExchangeRepository,
}

impl CascadeCleanup {
    pub fn new(pool: Pool<Sqlite>) -> CascadeCleanup {
        CascadeCleanup {
            offers: OfferRepository::new(pool.clone()),
            exchanges: ExchangeRepository::new(pool),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn on_group_deleted(&self, group: GroupId) -> Result<CleanupReport, anyhow::Error> {
        let mut report = CleanupReport::default();
        let mut first_error = None;

        let requesting = match self.offers.open_offers_requesting(group).await {
            Ok(ids) => ids,
            Err(err) => {
                record_failure(&mut first_error, "find offers requesting group", err);
                Vec::new()
            }
        };

        match self.offers.delete_requested_group(group).await {
            Ok(removed) => report.requested_groups_removed = removed,
            Err(err) => record_failure(&mut first_error, "remove requested group", err),
        }

        match self.offers.open_offers_offering(group, None).await {
            Ok(ids) => report.offers_removed += self.force_delete(ids, &mut first_error).await,
            Err(err) => record_failure(&mut first_error, "find offers of group", err),
        }

        // Offers that requested only this group can never be accepted.
        match self.offers.open_offers_without_requests(&requesting).await {
            Ok(ids) => report.offers_removed += self.force_delete(ids, &mut first_error).await,
            Err(err) => record_failure(&mut first_error, "find offers without requests", err),
        }

        match self.exchanges.delete_group_availability(group).await {
            Ok(removed) => report.available_groups_removed = removed,
            Err(err) => record_failure(&mut first_error, "remove available group", err),
        }

        info!("Cleaned up after deletion of {group:?}: {report:?}");

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn on_membership_removed(
        &self,
        user: UserId,
        group: GroupId,
    ) -> Result<CleanupReport, anyhow::Error> {
        let mut report = CleanupReport::default();
        let mut first_error = None;

        match self.offers.open_offers_offering(group, Some(user)).await {
            Ok(ids) => report.offers_removed = self.force_delete(ids, &mut first_error).await,
            Err(err) => record_failure(&mut first_error, "find offers of member", err),
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    async fn force_delete(
        &self,
        ids: Vec<OfferId>,
        first_error: &mut Option<anyhow::Error>,
    ) -> u64 {
        let mut deleted = 0;
        for id in ids {
            match self.offers.force_delete_offer(id).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(err) => record_failure(first_error, "delete offer", err),
            }
        }
        deleted
    }
}

fn record_failure(first_error: &mut Option<anyhow::Error>, step: &str, err: anyhow::Error) {
    error!("Cleanup step '{step}' failed: {err:#}");
    first_error.get_or_insert(err);
}
