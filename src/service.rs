//! The actions a user can perform on an exchange page.

use std::{
    collections::{BTreeSet, HashSet},
    str::FromStr,
    sync::Arc,
};

use sqlx::{Pool, Sqlite};
use tracing::{error, info};

use crate::{
    eligibility::{is_acceptable, RequestContext},
    error::{not_acceptable, validation_err, ExchangeError},
    matching::{find_matches, Candidate},
    models::{
        types::UtcDateTime, Availability, Exchange, ExchangeId, Group, GroupId, NewOffer, Offer,
        OfferId, OfferStatus, OfferWithGroups, User, UserId,
    },
    notify::Notifier,
    ordering,
    repository::{
        validate_new_offer, ExchangeRepository, GroupRepository, OfferRepository,
        PlatformRepository,
    },
    transaction::{CompletedSwap, ExchangeTransaction},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ActionKind {
    View,
    Offer,
    Delete,
    Accept,
}

impl ActionKind {
    /// Parses an action name as submitted by a client. No name means `view`.
    pub fn from_param(param: Option<&str>) -> Result<ActionKind, ExchangeError> {
        match param {
            None | Some("") => Ok(ActionKind::View),
            Some(name) => ActionKind::from_str(name)
                .map_err(|_| validation_err("action", format!("Unknown action '{name}'"))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OfferRequest {
    pub offered_group: GroupId,
    pub requested_groups: BTreeSet<GroupId>,
    /// Create the offer even if matching offers exist.
    pub ignore_matches: bool,
}

#[derive(Clone, Debug)]
pub enum Action {
    View,
    Offer(OfferRequest),
    Delete { offer: OfferId },
    Accept { offer: OfferId },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::View => ActionKind::View,
            Action::Offer(_) => ActionKind::Offer,
            Action::Delete { .. } => ActionKind::Delete,
            Action::Accept { .. } => ActionKind::Accept,
        }
    }
}

#[derive(Debug)]
pub enum ActionOutcome {
    View(ExchangeView),
    Offer(OfferOutcome),
    Delete(bool),
    Accept(CompletedSwap),
}

#[derive(Debug)]
pub enum OfferOutcome {
    Created(Offer),
    /// Standing offers the new one could be swapped with right away. Nothing was created.
    Matches(Vec<OfferRow>),
}

/// One offer as shown to a particular viewer.
#[derive(Clone, Debug)]
pub struct OfferRow {
    pub id: OfferId,
    /// `None` in anonymous exchanges.
    pub author: Option<User>,
    pub offered_group: Group,
    pub requested_groups: Vec<Group>,
    pub submitted_at: UtcDateTime,
    pub own: bool,
    pub acceptable: bool,
    /// Acceptable and the viewer is eligible.
    pub can_accept: bool,
}

#[derive(Clone, Debug)]
pub struct ExchangeView {
    pub exchange: Exchange,
    pub eligible: bool,
    /// Eligible and without a standing open offer.
    pub can_offer: bool,
    pub offers: Vec<OfferRow>,
}

#[derive(Clone, Debug)]
pub struct ExchangeSummary {
    pub exchange: Exchange,
    pub open_offers: usize,
    pub accepted_offers: usize,
}

pub struct ExchangeService {
    exchanges: ExchangeRepository,
    offers: OfferRepository,
    groups: GroupRepository,
    platform: PlatformRepository,
    transaction: ExchangeTransaction,
}

impl ExchangeService {
    pub fn new(pool: Pool<Sqlite>, notifier: Arc<dyn Notifier>) -> ExchangeService {
        ExchangeService {
            exchanges: ExchangeRepository::new(pool.clone()),
            offers: OfferRepository::new(pool.clone()),
            groups: GroupRepository::new(pool.clone()),
            platform: PlatformRepository::new(pool.clone()),
            transaction: ExchangeTransaction::new(pool, notifier),
        }
    }

    #[tracing::instrument(skip(self, action), fields(action = %action.kind()))]
    pub async fn handle(
        &self,
        exchange_id: ExchangeId,
        user: UserId,
        action: Action,
    ) -> Result<ActionOutcome, ExchangeError> {
        let result = self.perform(exchange_id, user, action).await;

        match &result {
            Err(err) if err.is_user_error() => info!("Refused: {err}"),
            Err(err) => error!("Action failed: {err:#}"),
            Ok(_) => {}
        }

        result
    }

    async fn perform(
        &self,
        exchange_id: ExchangeId,
        user: UserId,
        action: Action,
    ) -> Result<ActionOutcome, ExchangeError> {
        let outcome = match action {
            Action::View => ActionOutcome::View(self.view(exchange_id, user).await?),
            Action::Offer(request) => {
                ActionOutcome::Offer(self.offer(exchange_id, user, request).await?)
            }
            Action::Delete { offer } => {
                ActionOutcome::Delete(self.delete(exchange_id, user, offer).await?)
            }
            Action::Accept { offer } => {
                ActionOutcome::Accept(self.accept(exchange_id, user, offer).await?)
            }
        };

        Ok(outcome)
    }

    /// Offer counts of every exchange.
    pub async fn summaries(&self) -> Result<Vec<ExchangeSummary>, ExchangeError> {
        let mut summaries = Vec::new();

        for exchange in self.exchanges.get_exchanges().await? {
            let open_offers = self
                .offers
                .get_all_for_exchange(exchange.id, OfferStatus::Open)
                .await?
                .len();
            let accepted_offers = self
                .offers
                .get_all_for_exchange(exchange.id, OfferStatus::Accepted)
                .await?
                .len();

            summaries.push(ExchangeSummary {
                exchange,
                open_offers,
                accepted_offers,
            });
        }

        Ok(summaries)
    }

    /// Open offers of the exchange, in display order for `viewer`.
    pub async fn view(
        &self,
        exchange_id: ExchangeId,
        viewer: UserId,
    ) -> Result<ExchangeView, ExchangeError> {
        let exchange = self.available_exchange(exchange_id).await?;
        let context = RequestContext::new(viewer);

        let mut offers = self
            .offers
            .get_all_for_exchange(exchange.id, OfferStatus::Open)
            .await?;
        let viewer_groups = context.groups(&self.groups).await?;
        ordering::sort(&mut offers, viewer, viewer_groups);

        let eligible = context.is_eligible(&exchange, &self.platform).await?;
        let has_open_offer = offers.iter().any(|offer| offer.offer.author == viewer);

        let offers = offers
            .into_iter()
            .map(|offer| to_row(&exchange, offer, &context, viewer_groups, eligible))
            .collect();

        Ok(ExchangeView {
            exchange,
            eligible,
            can_offer: eligible && !has_open_offer,
            offers,
        })
    }

    /// Posts a new offer unless `request.ignore_matches` is off and standing
    /// offers already match it.
    pub async fn offer(
        &self,
        exchange_id: ExchangeId,
        author: UserId,
        request: OfferRequest,
    ) -> Result<OfferOutcome, ExchangeError> {
        let exchange = self.available_exchange(exchange_id).await?;
        let context = RequestContext::new(author);

        if !context.is_eligible(&exchange, &self.platform).await? {
            return Err(ExchangeError::NotEligible);
        }

        if !self
            .offers
            .open_offers_by_author(exchange.id, author)
            .await?
            .is_empty()
        {
            return Err(validation_err(
                "offered_group",
                "You already have an open offer in this exchange. Delete it before making a new one.",
            ));
        }

        let new_offer = NewOffer {
            exchange_id: exchange.id,
            author,
            offered_group: request.offered_group,
            requested_groups: request.requested_groups,
            submitted_at: UtcDateTime::now(),
        };

        let author_groups = context.groups(&self.groups).await?;
        validate_new_offer(&exchange, &new_offer, author_groups)?;

        if !request.ignore_matches {
            let candidate = Candidate {
                offered_group: new_offer.offered_group,
                requested_groups: new_offer.requested_groups.clone(),
            };
            let matches = find_matches(&self.offers, &exchange, &candidate).await?;

            if !matches.is_empty() {
                info!("Offer by {author:?} has {} matches, not creating it", matches.len());
                let rows = matches
                    .into_iter()
                    .map(|offer| to_row(&exchange, offer, &context, author_groups, true))
                    .collect();
                return Ok(OfferOutcome::Matches(rows));
            }
        }

        let offer = self.offers.create_offer(&exchange, &new_offer).await?;
        info!("{author:?} created offer {:?}", offer.id);

        Ok(OfferOutcome::Created(offer))
    }

    /// Deletes one of the user's open offers. Returns false for offers of
    /// other users and for accepted offers.
    pub async fn delete(
        &self,
        exchange_id: ExchangeId,
        user: UserId,
        offer_id: OfferId,
    ) -> Result<bool, ExchangeError> {
        let exchange = self.available_exchange(exchange_id).await?;

        match self.offers.get_offer(offer_id).await? {
            Some(offer) if offer.exchange_id == exchange.id => {}
            _ => return Err(ExchangeError::OfferNotFound(offer_id)),
        }

        let deleted = self.offers.delete_offer(offer_id, user, false).await?;
        if deleted {
            info!("{user:?} deleted offer {offer_id:?}");
        }

        Ok(deleted)
    }

    /// Accepts an offer, giving up the first of its requested groups (by
    /// name) that the accepter belongs to.
    pub async fn accept(
        &self,
        exchange_id: ExchangeId,
        accepter: UserId,
        offer_id: OfferId,
    ) -> Result<CompletedSwap, ExchangeError> {
        let exchange = self.available_exchange(exchange_id).await?;
        let context = RequestContext::new(accepter);

        if !context.is_eligible(&exchange, &self.platform).await? {
            return Err(ExchangeError::NotEligible);
        }

        let offer = self
            .offers
            .get_full(offer_id)
            .await?
            .filter(|offer| offer.offer.exchange_id == exchange.id)
            .ok_or(ExchangeError::OfferNotFound(offer_id))?;

        if !offer.offer.is_open() {
            return Err(ExchangeError::AlreadyAccepted);
        }

        if offer.offer.author == accepter {
            return Err(not_acceptable("this is your own offer"));
        }

        let accepter_groups = context.groups(&self.groups).await?;
        if accepter_groups.contains(&offer.offer.offered_group) {
            return Err(not_acceptable("you already belong to the offered group"));
        }

        let old_group = offer
            .requested_groups
            .iter()
            .find(|group| accepter_groups.contains(&group.id))
            .map(|group| group.id)
            .ok_or_else(|| not_acceptable("you are not in any of the requested groups"))?;

        self.transaction
            .accept_offer(&exchange, &offer.offer, accepter, old_group)
            .await
    }

    async fn available_exchange(&self, id: ExchangeId) -> Result<Exchange, ExchangeError> {
        let exchange = self
            .exchanges
            .get_exchange(id)
            .await?
            .ok_or(ExchangeError::ExchangeNotFound(id))?;

        match exchange.availability(UtcDateTime::now()) {
            Availability::Open => Ok(exchange),
            Availability::NotOpenYet(opens_at) => Err(ExchangeError::NotOpenYet { opens_at }),
            Availability::Closed(closed_at) => Err(ExchangeError::Closed { closed_at }),
        }
    }
}

fn to_row(
    exchange: &Exchange,
    offer: OfferWithGroups,
    context: &RequestContext,
    viewer_groups: &HashSet<GroupId>,
    eligible: bool,
) -> OfferRow {
    let own = offer.offer.author == context.user();
    let acceptable = is_acceptable(&offer.offer, context.user(), viewer_groups);

    OfferRow {
        id: offer.offer.id,
        author: (!exchange.anonymous).then_some(offer.author),
        offered_group: offer.offered_group,
        requested_groups: offer.requested_groups,
        submitted_at: offer.offer.submitted_at,
        own,
        acceptable,
        can_accept: acceptable && eligible,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use test_log::test;
    use time::Duration;

    use super::{Action, ActionKind, ActionOutcome, ExchangeService, OfferOutcome, OfferRequest};
    use crate::{
        error::ExchangeError,
        models::{types::UtcDateTime, GroupId, OfferStatus, Role, TimeWindow},
        notify::{testing::RecordingNotifier, TracingNotifier},
        testing::Fixture,
    };

    fn service(fixture: &Fixture) -> (ExchangeService, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        (
            ExchangeService::new(fixture.pool.clone(), notifier.clone()),
            notifier,
        )
    }

    fn request(offered: GroupId, requested: &[GroupId], ignore_matches: bool) -> OfferRequest {
        OfferRequest {
            offered_group: offered,
            requested_groups: requested.iter().copied().collect(),
            ignore_matches,
        }
    }

    #[test]
    fn action_names_parse() {
        assert_eq!(ActionKind::from_param(None).unwrap(), ActionKind::View);
        assert_eq!(ActionKind::from_param(Some("")).unwrap(), ActionKind::View);
        assert_eq!(
            ActionKind::from_param(Some("accept")).unwrap(),
            ActionKind::Accept
        );
        assert_eq!(ActionKind::Delete.to_string(), "delete");
        assert!(matches!(
            ActionKind::from_param(Some("steal")),
            Err(ExchangeError::Validation { field: "action", .. })
        ));
    }

    #[test(tokio::test)]
    async fn offer_then_accept_swaps_groups() {
        let fixture = Fixture::new().await;
        let exchange = fixture.exchange(false).await;
        let (service, notifier) = service(&fixture);

        let created = service
            .offer(
                exchange.id,
                fixture.u1.id,
                request(fixture.a.id, &[fixture.b.id, fixture.c.id], false),
            )
            .await
            .unwrap();
        let OfferOutcome::Created(offer) = created else {
            panic!("expected a new offer");
        };

        let view = service.view(exchange.id, fixture.u2.id).await.unwrap();
        assert_eq!(view.offers.len(), 1);
        assert!(view.offers[0].acceptable);
        assert!(view.offers[0].can_accept);
        assert!(!view.offers[0].own);
        assert!(view.can_offer);

        let outcome = service
            .handle(exchange.id, fixture.u2.id, Action::Accept { offer: offer.id })
            .await
            .unwrap();
        let ActionOutcome::Accept(swap) = outcome else {
            panic!("expected a swap");
        };
        assert_eq!(swap.accepted_group, fixture.b.id);

        assert_eq!(
            fixture.groups.groups_of(fixture.u1.id).await.unwrap(),
            [fixture.b.id].into()
        );
        assert_eq!(
            fixture.groups.groups_of(fixture.u2.id).await.unwrap(),
            [fixture.a.id].into()
        );
        assert_eq!(notifier.sent().len(), 1);

        let again = service.accept(exchange.id, fixture.u4.id, offer.id).await;
        assert!(matches!(again, Err(ExchangeError::AlreadyAccepted)));
    }

    #[test(tokio::test)]
    async fn second_offer_is_refused() {
        let fixture = Fixture::new().await;
        let exchange = fixture.exchange(false).await;
        let (service, _) = service(&fixture);

        service
            .offer(exchange.id, fixture.u1.id, request(fixture.a.id, &[fixture.b.id], false))
            .await
            .unwrap();
        let duplicate = service
            .offer(exchange.id, fixture.u1.id, request(fixture.a.id, &[fixture.c.id], false))
            .await;

        assert!(matches!(duplicate, Err(ExchangeError::Validation { .. })));
        assert_eq!(
            fixture
                .offers
                .get_all_for_exchange(exchange.id, OfferStatus::Open)
                .await
                .unwrap()
                .len(),
            1
        );

        let view = service.view(exchange.id, fixture.u1.id).await.unwrap();
        assert!(!view.can_offer);
        assert!(view.offers[0].own);
        assert!(!view.offers[0].acceptable);
    }

    #[test(tokio::test)]
    async fn invalid_offers_are_refused() {
        let fixture = Fixture::new().await;
        let exchange = fixture.exchange(false).await;
        let (service, _) = service(&fixture);

        let not_member = service
            .offer(exchange.id, fixture.u1.id, request(fixture.b.id, &[fixture.c.id], false))
            .await;
        assert!(matches!(
            not_member,
            Err(ExchangeError::Validation { field: "offered_group", .. })
        ));

        let nothing_requested = service
            .offer(exchange.id, fixture.u1.id, request(fixture.a.id, &[], false))
            .await;
        assert!(matches!(
            nothing_requested,
            Err(ExchangeError::Validation { field: "requested_groups", .. })
        ));

        let own_group = service
            .offer(exchange.id, fixture.u1.id, request(fixture.a.id, &[fixture.a.id], false))
            .await;
        assert!(matches!(
            own_group,
            Err(ExchangeError::Validation { field: "requested_groups", .. })
        ));
    }

    #[test(tokio::test)]
    async fn matching_offers_are_returned_instead_of_created() {
        let fixture = Fixture::new().await;
        let exchange = fixture.exchange(false).await;
        let (service, _) = service(&fixture);

        let standing = fixture
            .create_offer(&exchange, fixture.u1.id, fixture.a.id, &[fixture.b.id])
            .await;

        let outcome = service
            .offer(exchange.id, fixture.u2.id, request(fixture.b.id, &[fixture.a.id], false))
            .await
            .unwrap();
        let OfferOutcome::Matches(matches) = outcome else {
            panic!("expected matches");
        };
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, standing.id);
        assert!(matches[0].can_accept);
        assert!(fixture
            .offers
            .open_offers_by_author(exchange.id, fixture.u2.id)
            .await
            .unwrap()
            .is_empty());

        let outcome = service
            .offer(exchange.id, fixture.u2.id, request(fixture.b.id, &[fixture.a.id], true))
            .await
            .unwrap();
        assert!(matches!(outcome, OfferOutcome::Created(_)));
    }

    #[test(tokio::test)]
    async fn only_the_author_deletes() {
        let fixture = Fixture::new().await;
        let exchange = fixture.exchange(false).await;
        let other_exchange = fixture.exchange(false).await;
        let (service, _) = service(&fixture);

        let offer = fixture
            .create_offer(&exchange, fixture.u1.id, fixture.a.id, &[fixture.b.id])
            .await;

        assert!(!service.delete(exchange.id, fixture.u2.id, offer.id).await.unwrap());
        assert!(matches!(
            service.delete(other_exchange.id, fixture.u1.id, offer.id).await,
            Err(ExchangeError::OfferNotFound(_))
        ));
        assert!(service.delete(exchange.id, fixture.u1.id, offer.id).await.unwrap());
        assert!(matches!(
            service.delete(exchange.id, fixture.u1.id, offer.id).await,
            Err(ExchangeError::OfferNotFound(_))
        ));
    }

    #[test(tokio::test)]
    async fn accept_refusals() {
        let fixture = Fixture::new().await;
        let exchange = fixture.exchange(false).await;
        let (service, notifier) = service(&fixture);

        let offer = fixture
            .create_offer(&exchange, fixture.u1.id, fixture.a.id, &[fixture.b.id])
            .await;

        assert!(matches!(
            service.accept(exchange.id, fixture.u1.id, offer.id).await,
            Err(ExchangeError::NotAcceptable(_))
        ));
        assert!(matches!(
            service.accept(exchange.id, fixture.u3.id, offer.id).await,
            Err(ExchangeError::NotAcceptable(_))
        ));

        // u4 is already in A as well as B.
        fixture
            .groups
            .add_member(fixture.a.id, fixture.u4.id)
            .await
            .unwrap();
        assert!(matches!(
            service.accept(exchange.id, fixture.u4.id, offer.id).await,
            Err(ExchangeError::NotAcceptable(_))
        ));

        assert!(matches!(
            service.accept(exchange.id, fixture.u2.id, crate::models::OfferId(999)).await,
            Err(ExchangeError::OfferNotFound(_))
        ));
        assert!(notifier.sent().is_empty());
    }

    #[test(tokio::test)]
    async fn students_only_exchange_checks_roles() {
        let fixture = Fixture::new().await;
        let exchange = fixture.exchange(true).await;
        let (service, _) = service(&fixture);

        let refused = service
            .offer(exchange.id, fixture.u1.id, request(fixture.a.id, &[fixture.b.id], false))
            .await;
        assert!(matches!(refused, Err(ExchangeError::NotEligible)));

        fixture
            .platform
            .assign_role(fixture.course.id, fixture.u1.id, Role::Student)
            .await
            .unwrap();
        let OfferOutcome::Created(offer) = service
            .offer(exchange.id, fixture.u1.id, request(fixture.a.id, &[fixture.b.id], false))
            .await
            .unwrap()
        else {
            panic!("expected a new offer");
        };

        let view = service.view(exchange.id, fixture.u2.id).await.unwrap();
        assert!(!view.eligible);
        assert!(!view.can_offer);
        assert!(view.offers[0].acceptable);
        assert!(!view.offers[0].can_accept);

        assert!(matches!(
            service.accept(exchange.id, fixture.u2.id, offer.id).await,
            Err(ExchangeError::NotEligible)
        ));
    }

    #[test(tokio::test)]
    async fn anonymous_exchange_hides_authors() {
        let fixture = Fixture::new().await;
        let mut new_exchange = fixture.new_exchange(false);
        new_exchange.anonymous = true;
        let exchange = fixture
            .exchanges
            .create_exchange(&new_exchange)
            .await
            .unwrap();
        let (service, _) = service(&fixture);

        fixture
            .create_offer(&exchange, fixture.u1.id, fixture.a.id, &[fixture.b.id])
            .await;

        let view = service.view(exchange.id, fixture.u1.id).await.unwrap();
        assert!(view.offers[0].author.is_none());
        assert!(view.offers[0].own);

        let view = service.view(exchange.id, fixture.u2.id).await.unwrap();
        assert!(view.offers[0].author.is_none());
        assert!(!view.offers[0].own);
    }

    #[test(tokio::test)]
    async fn time_window_is_enforced() {
        let fixture = Fixture::new().await;
        let (service, _) = service(&fixture);
        let now = UtcDateTime::now();

        let mut upcoming = fixture.new_exchange(false);
        upcoming.time_window = Some(TimeWindow {
            open: now + Duration::days(1),
            close: now + Duration::days(2),
        });
        let upcoming = fixture.exchanges.create_exchange(&upcoming).await.unwrap();

        let mut past = fixture.new_exchange(false);
        past.time_window = Some(TimeWindow {
            open: now - Duration::days(2),
            close: now - Duration::days(1),
        });
        let past = fixture.exchanges.create_exchange(&past).await.unwrap();

        let mut current = fixture.new_exchange(false);
        current.time_window = Some(TimeWindow {
            open: now - Duration::days(1),
            close: now + Duration::days(1),
        });
        let current = fixture.exchanges.create_exchange(&current).await.unwrap();

        assert!(matches!(
            service.view(upcoming.id, fixture.u1.id).await,
            Err(ExchangeError::NotOpenYet { .. })
        ));
        assert!(matches!(
            service
                .offer(past.id, fixture.u1.id, request(fixture.a.id, &[fixture.b.id], true))
                .await,
            Err(ExchangeError::Closed { .. })
        ));
        assert!(service.view(current.id, fixture.u1.id).await.is_ok());
    }

    #[test(tokio::test)]
    async fn view_orders_for_the_viewer() {
        let fixture = Fixture::new().await;
        let exchange = fixture.exchange(false).await;
        let (service, _) = service(&fixture);

        let from_c = fixture
            .create_offer(&exchange, fixture.u3.id, fixture.c.id, &[fixture.a.id])
            .await;
        let from_a = fixture
            .create_offer(&exchange, fixture.u1.id, fixture.a.id, &[fixture.c.id])
            .await;
        let from_b = fixture
            .create_offer(&exchange, fixture.u2.id, fixture.b.id, &[fixture.c.id])
            .await;

        let view = service.view(exchange.id, fixture.u3.id).await.unwrap();
        let ids = view.offers.iter().map(|row| row.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![from_c.id, from_a.id, from_b.id]);
        assert_eq!(
            view.offers[0]
                .requested_groups
                .iter()
                .map(|g| g.id)
                .collect::<Vec<_>>(),
            vec![fixture.a.id]
        );
        assert_eq!(
            view.offers[1].author.as_ref().map(|u| u.id),
            Some(fixture.u1.id)
        );
    }

    #[test(tokio::test)]
    async fn summaries_count_offers_per_exchange() {
        let fixture = Fixture::new().await;
        let busy = fixture.exchange(false).await;
        let quiet = fixture.exchange(false).await;
        let service = ExchangeService::new(fixture.pool.clone(), Arc::new(TracingNotifier));

        let accepted = fixture
            .create_offer(&busy, fixture.u1.id, fixture.a.id, &[fixture.b.id])
            .await;
        fixture
            .create_offer(&busy, fixture.u3.id, fixture.c.id, &[fixture.a.id])
            .await;
        service
            .accept(busy.id, fixture.u2.id, accepted.id)
            .await
            .unwrap();

        let summaries = service.summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);

        let busy_summary = summaries.iter().find(|s| s.exchange.id == busy.id).unwrap();
        assert_eq!(busy_summary.open_offers, 1);
        assert_eq!(busy_summary.accepted_offers, 1);

        let quiet_summary = summaries.iter().find(|s| s.exchange.id == quiet.id).unwrap();
        assert_eq!(quiet_summary.open_offers, 0);
        assert_eq!(quiet_summary.accepted_offers, 0);
    }

    #[test(tokio::test)]
    async fn storage_failures_are_not_user_errors() {
        let fixture = Fixture::new().await;
        let exchange = fixture.exchange(false).await;
        let (service, _) = service(&fixture);

        let refused = service
            .handle(exchange.id, fixture.u1.id, Action::Accept { offer: crate::models::OfferId(7) })
            .await
            .unwrap_err();
        assert!(refused.is_user_error());

        fixture.pool.close().await;
        let failed = service
            .handle(exchange.id, fixture.u1.id, Action::View)
            .await
            .unwrap_err();
        assert!(matches!(failed, ExchangeError::Storage(_)));
        assert!(!failed.is_user_error());
    }

    #[test(tokio::test)]
    async fn unknown_exchange_is_not_found() {
        let fixture = Fixture::new().await;
        let (service, _) = service(&fixture);

        assert!(matches!(
            service
                .handle(crate::models::ExchangeId(42), fixture.u1.id, Action::View)
                .await,
            Err(ExchangeError::ExchangeNotFound(_))
        ));
    }
}
