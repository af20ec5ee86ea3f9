//! The atomic swap performed when an offer is accepted.

use std::sync::Arc;

use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

use crate::{
    database::BEGIN_IMMEDIATE,
    error::{not_acceptable, ExchangeError},
    models::{Exchange, GroupId, Offer, OfferId, UserId},
    notify::{Notifier, OfferAccepted},
    repository::{
        delete_member, delete_offer_rows, insert_member, mark_accepted, select_course,
        select_groups, select_groups_of, select_offer, select_open_offer_ids_by_author,
        select_user,
    },
};

/// What an accepted offer changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedSwap {
    pub offer: OfferId,
    pub author: UserId,
    pub accepter: UserId,
    /// Left by the author, joined by the accepter.
    pub offered_group: GroupId,
    /// Left by the accepter, joined by the author.
    pub accepted_group: GroupId,
    /// Open offers of the accepter that were dropped along the way.
    pub withdrawn_offers: Vec<OfferId>,
}

pub struct ExchangeTransaction {
    pool: Pool<Sqlite>,
    notifier: Arc<dyn Notifier>,
}

impl ExchangeTransaction {
    pub fn new(pool: Pool<Sqlite>, notifier: Arc<dyn Notifier>) -> ExchangeTransaction {
        ExchangeTransaction { pool, notifier }
    }

    /// Accepts `offer` on behalf of `accepter`, who gives up `accepter_old_group`.
    ///
    /// Every precondition is checked again against the stored state, and all
    /// writes share one database transaction. When two accepts race, only the
    /// first to commit succeeds; the other fails with
    /// [`ExchangeError::AlreadyAccepted`] and changes nothing. The author is
    /// notified once the swap is committed.
    #[tracing::instrument(skip(self, exchange, offer), fields(exchange = ?exchange.id, offer = ?offer.id))]
    pub async fn accept_offer(
        &self,
        exchange: &Exchange,
        offer: &Offer,
        accepter: UserId,
        accepter_old_group: GroupId,
    ) -> Result<CompletedSwap, ExchangeError> {
        // Holding the write lock from the start makes a concurrent accept wait
        // here and then find the offer already accepted.
        let mut transaction = self.pool.begin_with(BEGIN_IMMEDIATE).await?;

        let offer = select_offer(&mut transaction, offer.id)
            .await?
            .filter(|stored| stored.exchange_id == exchange.id)
            .ok_or(ExchangeError::OfferNotFound(offer.id))?;

        if !offer.is_open() {
            return Err(ExchangeError::AlreadyAccepted);
        }

        if offer.author == accepter {
            return Err(not_acceptable("this is your own offer"));
        }

        if !offer.requested_groups.contains(&accepter_old_group) {
            return Err(not_acceptable(
                "the offer does not request the group you would give up",
            ));
        }

        let accepter_groups = select_groups_of(&mut transaction, accepter).await?;
        if !accepter_groups.contains(&accepter_old_group) {
            return Err(not_acceptable(
                "you are not a member of the group you would give up",
            ));
        }

        let withdrawn_offers =
            select_open_offer_ids_by_author(&mut transaction, exchange.id, accepter).await?;
        for id in &withdrawn_offers {
            delete_offer_rows(&mut transaction, *id).await?;
        }

        if !mark_accepted(&mut transaction, offer.id, accepter, accepter_old_group).await? {
            return Err(ExchangeError::AlreadyAccepted);
        }

        delete_member(&mut transaction, offer.offered_group, offer.author).await?;
        delete_member(&mut transaction, accepter_old_group, accepter).await?;
        insert_member(&mut transaction, accepter_old_group, offer.author).await?;
        insert_member(&mut transaction, offer.offered_group, accepter).await?;

        let accepter_name = select_user(&mut transaction, accepter)
            .await?
            .map(|user| user.display_name())
            .unwrap_or_else(|| format!("user {}", accepter.0));
        let course_name = select_course(&mut transaction, exchange.course)
            .await?
            .map(|course| course.full_name)
            .unwrap_or_else(|| format!("course {}", exchange.course.0));
        let groups =
            select_groups(&mut transaction, [offer.offered_group, accepter_old_group]).await?;
        let group_name = |id: GroupId| {
            groups
                .iter()
                .find(|group| group.id == id)
                .map(|group| group.name.clone())
                .unwrap_or_else(|| format!("group {}", id.0))
        };
        let group_from = group_name(offer.offered_group);
        let group_to = group_name(accepter_old_group);

        transaction.commit().await?;

        info!(
            "{:?} accepted offer {:?} by {:?}: {:?} <-> {:?}",
            accepter, offer.id, offer.author, offer.offered_group, accepter_old_group
        );
        if !withdrawn_offers.is_empty() {
            debug!("Withdrew open offers {:?} of {:?}", withdrawn_offers, accepter);
        }

        let notification = OfferAccepted {
            accepter_name: &accepter_name,
            course_name: &course_name,
            exchange_name: &exchange.name,
            group_from: &group_from,
            group_to: &group_to,
        }
        .into_notification(accepter, offer.author);
        self.notifier.send(notification).await;

        Ok(CompletedSwap {
            offer: offer.id,
            author: offer.author,
            accepter,
            offered_group: offer.offered_group,
            accepted_group: accepter_old_group,
            withdrawn_offers,
        })
    }
}
