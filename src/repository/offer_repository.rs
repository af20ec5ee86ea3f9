use std::collections::{BTreeSet, HashMap, HashSet};

use sqlx::{query, query_as, query_scalar, FromRow, Pool, QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, warn};

use crate::{
    database::BEGIN_IMMEDIATE,
    error::{validation_err, ExchangeError},
    models::{
        types::UtcDateTime, Exchange, ExchangeId, Group, GroupId, NewOffer, Offer, OfferId,
        OfferState, OfferStatus, OfferWithGroups, User, UserId,
    },
};

use super::{
    conversion::{DBConvertible, DBFromConversionError, DBToConversionError},
    group_repository::{select_groups, select_groups_of},
    platform_repository::select_users,
};

#[derive(Debug, Clone)]
pub struct OfferRepository {
    pool: Pool<Sqlite>,
}

impl OfferRepository {
    pub fn new(pool: Pool<Sqlite>) -> OfferRepository {
        OfferRepository { pool }
    }

    /// Validates and stores a new open offer.
    ///
    /// The duplicate check and the insert are separate statements, so two
    /// concurrent submissions of the same offer can both succeed.
    #[tracing::instrument(skip_all, fields(exchange = ?exchange.id, author = ?new_offer.author))]
    pub async fn create_offer(
        &self,
        exchange: &Exchange,
        new_offer: &NewOffer,
    ) -> Result<Offer, ExchangeError> {
        if new_offer.exchange_id != exchange.id {
            return Err(validation_err(
                "exchange",
                "The offer does not belong to this exchange",
            ));
        }

        let author_groups = {
            let mut connection = self.pool.acquire().await?;
            select_groups_of(&mut connection, new_offer.author).await?
        };

        validate_new_offer(exchange, new_offer, &author_groups)?;

        if self
            .has_open_offer(exchange.id, new_offer.author, new_offer.offered_group)
            .await?
        {
            return Err(validation_err(
                "offered_group",
                "You already have an offer with this group in this exchange. The offer was not created again.",
            ));
        }

        let mut transaction = self.pool.begin().await?;

        let added_offer = query_as::<_, SqlOffer>(
            r#"
                INSERT INTO offers (exchange_id, author, offered_group, submitted_at)
                VALUES (?, ?, ?, ?)
                RETURNING
                    id,
                    exchange_id,
                    author,
                    offered_group,
                    submitted_at,
                    accepted_by,
                    accepted_group
            "#,
        )
        .bind(new_offer.exchange_id.to_db()?)
        .bind(new_offer.author.to_db()?)
        .bind(new_offer.offered_group.to_db()?)
        .bind(new_offer.submitted_at.to_db()?)
        .fetch_one(&mut *transaction)
        .await?;

        let mut requested_groups = Vec::with_capacity(new_offer.requested_groups.len());
        for group in &new_offer.requested_groups {
            let group = group.to_db()?;
            query("INSERT INTO offer_requested_groups (offer_id, group_id) VALUES (?, ?)")
                .bind(added_offer.id)
                .bind(group)
                .execute(&mut *transaction)
                .await?;
            requested_groups.push(group);
        }

        transaction.commit().await?;

        debug!("Created offer {}", added_offer.id);

        Ok(Offer::from_db(&(added_offer, requested_groups))?)
    }

    /// Deletes an offer with its requested groups.
    ///
    /// Without `force` only the author may delete, and only while the offer is
    /// open. Returns false when nothing was deleted.
    #[tracing::instrument(skip(self))]
    pub async fn delete_offer(
        &self,
        offer_id: OfferId,
        requesting_user: UserId,
        force: bool,
    ) -> Result<bool, anyhow::Error> {
        let mut transaction = self.pool.begin_with(BEGIN_IMMEDIATE).await?;

        if !force {
            let is_author = query_scalar::<_, bool>(
                r#"
                    SELECT EXISTS (
                        SELECT 1 FROM offers
                        WHERE id = ? AND author = ? AND accepted_by IS NULL
                    )
                "#,
            )
            .bind(offer_id.to_db()?)
            .bind(requesting_user.to_db()?)
            .fetch_one(&mut *transaction)
            .await?;

            if !is_author {
                return Ok(false);
            }
        }

        let deleted = delete_offer_rows(&mut transaction, offer_id).await?;

        transaction.commit().await?;

        Ok(deleted)
    }

    /// Deletes an offer regardless of its author or state.
    pub async fn force_delete_offer(&self, offer_id: OfferId) -> Result<bool, anyhow::Error> {
        let mut transaction = self.pool.begin().await?;
        let deleted = delete_offer_rows(&mut transaction, offer_id).await?;
        transaction.commit().await?;

        Ok(deleted)
    }

    pub async fn get_offer(&self, id: OfferId) -> Result<Option<Offer>, anyhow::Error> {
        let mut transaction = self.pool.begin().await?;
        let offer = select_offer(&mut transaction, id).await?;
        transaction.commit().await?;

        Ok(offer)
    }

    pub async fn get_full(&self, id: OfferId) -> Result<Option<OfferWithGroups>, anyhow::Error> {
        let mut transaction = self.pool.begin().await?;

        let offer = match select_offer(&mut transaction, id).await? {
            Some(offer) => hydrate(&mut transaction, vec![offer]).await?.pop(),
            None => None,
        };

        transaction.commit().await?;

        Ok(offer)
    }

    /// Offers of an exchange in the given state, oldest first.
    pub async fn get_all_for_exchange(
        &self,
        exchange_id: ExchangeId,
        status: OfferStatus,
    ) -> Result<Vec<OfferWithGroups>, anyhow::Error> {
        let mut transaction = self.pool.begin().await?;

        let sql = match status {
            OfferStatus::Open => {
                r#"
                    SELECT
                        id,
                        exchange_id,
                        author,
                        offered_group,
                        submitted_at,
                        accepted_by,
                        accepted_group
                    FROM offers
                    WHERE exchange_id = ? AND accepted_by IS NULL
                    ORDER BY submitted_at, id
                "#
            }
            OfferStatus::Accepted => {
                r#"
                    SELECT
                        id,
                        exchange_id,
                        author,
                        offered_group,
                        submitted_at,
                        accepted_by,
                        accepted_group
                    FROM offers
                    WHERE exchange_id = ? AND accepted_by IS NOT NULL
                    ORDER BY submitted_at, id
                "#
            }
        };

        let rows = query_as::<_, SqlOffer>(sql)
            .bind(exchange_id.to_db()?)
            .fetch_all(&mut *transaction)
            .await?;

        let offers = attach_requested_groups(&mut transaction, rows).await?;
        let offers = hydrate(&mut transaction, offers).await?;

        transaction.commit().await?;

        Ok(offers)
    }

    /// Open offers whose offered group is one of `requested_groups` and which
    /// themselves request `offered_group`.
    pub async fn find_matching_offers(
        &self,
        exchange_id: ExchangeId,
        offered_group: GroupId,
        requested_groups: &BTreeSet<GroupId>,
    ) -> Result<Vec<OfferWithGroups>, anyhow::Error> {
        if requested_groups.is_empty() {
            return Ok(Vec::new());
        }

        let mut transaction = self.pool.begin().await?;

        let mut builder = QueryBuilder::<Sqlite>::new(
            r#"
                SELECT
                    o.id,
                    o.exchange_id,
                    o.author,
                    o.offered_group,
                    o.submitted_at,
                    o.accepted_by,
                    o.accepted_group
                FROM offers o
                WHERE o.exchange_id = "#,
        );
        builder.push_bind(exchange_id.to_db()?);
        builder.push(" AND o.accepted_by IS NULL AND o.offered_group IN (");
        let mut separated = builder.separated(", ");
        for group in requested_groups {
            separated.push_bind(group.to_db()?);
        }
        separated.push_unseparated(
            r#")
                AND EXISTS (
                    SELECT 1 FROM offer_requested_groups r
                    WHERE r.offer_id = o.id AND r.group_id = "#,
        );
        builder.push_bind(offered_group.to_db()?);
        builder.push(") ORDER BY o.submitted_at, o.id");

        let rows = builder
            .build_query_as::<SqlOffer>()
            .fetch_all(&mut *transaction)
            .await?;

        let offers = attach_requested_groups(&mut transaction, rows).await?;
        let offers = hydrate(&mut transaction, offers).await?;

        transaction.commit().await?;

        Ok(offers)
    }

    pub async fn has_open_offer(
        &self,
        exchange_id: ExchangeId,
        author: UserId,
        offered_group: GroupId,
    ) -> Result<bool, anyhow::Error> {
        let exists = query_scalar::<_, bool>(
            r#"
                SELECT EXISTS (
                    SELECT 1 FROM offers
                    WHERE exchange_id = ?
                        AND author = ?
                        AND offered_group = ?
                        AND accepted_by IS NULL
                )
            "#,
        )
        .bind(exchange_id.to_db()?)
        .bind(author.to_db()?)
        .bind(offered_group.to_db()?)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    pub async fn open_offers_by_author(
        &self,
        exchange_id: ExchangeId,
        author: UserId,
    ) -> Result<Vec<OfferId>, anyhow::Error> {
        let mut connection = self.pool.acquire().await?;
        select_open_offer_ids_by_author(&mut connection, exchange_id, author).await
    }

    /// Open offers in any exchange offering `group`, optionally only those by `author`.
    pub async fn open_offers_offering(
        &self,
        group: GroupId,
        author: Option<UserId>,
    ) -> Result<Vec<OfferId>, anyhow::Error> {
        let ids = match author {
            Some(author) => {
                query_scalar::<_, i64>(
                    r#"
                        SELECT id FROM offers
                        WHERE offered_group = ? AND author = ? AND accepted_by IS NULL
                    "#,
                )
                .bind(group.to_db()?)
                .bind(author.to_db()?)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                query_scalar::<_, i64>(
                    "SELECT id FROM offers WHERE offered_group = ? AND accepted_by IS NULL",
                )
                .bind(group.to_db()?)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(ids.iter().map(OfferId::from_db).collect::<Result<_, _>>()?)
    }

    /// Open offers in any exchange that request `group`.
    pub async fn open_offers_requesting(
        &self,
        group: GroupId,
    ) -> Result<Vec<OfferId>, anyhow::Error> {
        let ids = query_scalar::<_, i64>(
            r#"
                SELECT o.id FROM offers o
                JOIN offer_requested_groups r ON r.offer_id = o.id
                WHERE r.group_id = ? AND o.accepted_by IS NULL
            "#,
        )
        .bind(group.to_db()?)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.iter().map(OfferId::from_db).collect::<Result<_, _>>()?)
    }

    /// Those of `candidates` that are open and no longer request any group.
    /// Such offers can never be accepted.
    pub async fn open_offers_without_requests(
        &self,
        candidates: &[OfferId],
    ) -> Result<Vec<OfferId>, anyhow::Error> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            r#"
                SELECT o.id FROM offers o
                WHERE o.accepted_by IS NULL
                    AND NOT EXISTS (
                        SELECT 1 FROM offer_requested_groups r WHERE r.offer_id = o.id
                    )
                    AND o.id IN ("#,
        );
        let mut separated = builder.separated(", ");
        for id in candidates {
            separated.push_bind(id.to_db()?);
        }
        separated.push_unseparated(")");

        let ids = builder
            .build_query_scalar::<i64>()
            .fetch_all(&self.pool)
            .await?;

        Ok(ids.iter().map(OfferId::from_db).collect::<Result<_, _>>()?)
    }

    /// Removes `group` from the requested groups of every offer.
    pub async fn delete_requested_group(&self, group: GroupId) -> Result<u64, anyhow::Error> {
        let deleted = query("DELETE FROM offer_requested_groups WHERE group_id = ?")
            .bind(group.to_db()?)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }
}

/// Checks a new offer against the author's current groups and the exchange's
/// available groups.
pub fn validate_new_offer(
    exchange: &Exchange,
    new_offer: &NewOffer,
    author_groups: &HashSet<GroupId>,
) -> Result<(), ExchangeError> {
    if !author_groups.contains(&new_offer.offered_group)
        || !exchange.is_group_available(new_offer.offered_group)
    {
        return Err(validation_err(
            "offered_group",
            "The offered group must be one of your groups available in this exchange",
        ));
    }

    if new_offer.requested_groups.is_empty() {
        return Err(validation_err(
            "requested_groups",
            "You have to request at least one group",
        ));
    }

    for group in &new_offer.requested_groups {
        if !exchange.is_group_available(*group) || author_groups.contains(group) {
            return Err(validation_err(
                "requested_groups",
                format!("Group {} cannot be requested", group.0),
            ));
        }
    }

    Ok(())
}

pub(crate) async fn select_offer(
    connection: &mut SqliteConnection,
    id: OfferId,
) -> Result<Option<Offer>, anyhow::Error> {
    let row = query_as::<_, SqlOffer>(
        r#"
            SELECT
                id,
                exchange_id,
                author,
                offered_group,
                submitted_at,
                accepted_by,
                accepted_group
            FROM offers
            WHERE id = ?
        "#,
    )
    .bind(id.to_db()?)
    .fetch_optional(&mut *connection)
    .await?;

    match row {
        Some(row) => Ok(attach_requested_groups(connection, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

pub(crate) async fn select_open_offer_ids_by_author(
    connection: &mut SqliteConnection,
    exchange_id: ExchangeId,
    author: UserId,
) -> Result<Vec<OfferId>, anyhow::Error> {
    let ids = query_scalar::<_, i64>(
        r#"
            SELECT id FROM offers
            WHERE exchange_id = ? AND author = ? AND accepted_by IS NULL
            ORDER BY id
        "#,
    )
    .bind(exchange_id.to_db()?)
    .bind(author.to_db()?)
    .fetch_all(&mut *connection)
    .await?;

    Ok(ids.iter().map(OfferId::from_db).collect::<Result<_, _>>()?)
}

/// Moves an open offer into the accepted state.
///
/// Returns false if the offer is gone or was accepted in the meantime.
pub(crate) async fn mark_accepted(
    connection: &mut SqliteConnection,
    id: OfferId,
    accepted_by: UserId,
    accepted_group: GroupId,
) -> Result<bool, anyhow::Error> {
    let (accepted_by, accepted_group) = OfferState::Accepted {
        by: accepted_by,
        accepted_group,
    }
    .to_db()?;

    let updated = query(
        r#"
            UPDATE offers SET accepted_by = ?, accepted_group = ?
            WHERE id = ? AND accepted_by IS NULL
        "#,
    )
    .bind(accepted_by)
    .bind(accepted_group)
    .bind(id.to_db()?)
    .execute(&mut *connection)
    .await?
    .rows_affected();

    Ok(updated == 1)
}

/// Requested groups go first so that no offer row is left without them.
pub(crate) async fn delete_offer_rows(
    connection: &mut SqliteConnection,
    id: OfferId,
) -> Result<bool, anyhow::Error> {
    let id = id.to_db()?;

    query("DELETE FROM offer_requested_groups WHERE offer_id = ?")
        .bind(id)
        .execute(&mut *connection)
        .await?;

    let deleted = query("DELETE FROM offers WHERE id = ?")
        .bind(id)
        .execute(&mut *connection)
        .await?
        .rows_affected();

    Ok(deleted > 0)
}

async fn attach_requested_groups(
    connection: &mut SqliteConnection,
    rows: Vec<SqlOffer>,
) -> Result<Vec<Offer>, anyhow::Error> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT offer_id, group_id FROM offer_requested_groups WHERE offer_id IN (",
    );
    let mut separated = builder.separated(", ");
    for row in &rows {
        separated.push_bind(row.id);
    }
    separated.push_unseparated(")");

    let pairs = builder
        .build_query_as::<(i64, i64)>()
        .fetch_all(&mut *connection)
        .await?;

    let mut requested: HashMap<i64, Vec<i64>> = HashMap::new();
    for (offer_id, group_id) in pairs {
        requested.entry(offer_id).or_default().push(group_id);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let groups = requested.remove(&row.id).unwrap_or_default();
            Offer::from_db(&(row, groups))
        })
        .collect::<Result<_, _>>()?)
}

/// Loads authors and groups for display.
///
/// Offers whose author or offered group no longer exist are skipped.
pub(crate) async fn hydrate(
    connection: &mut SqliteConnection,
    offers: Vec<Offer>,
) -> Result<Vec<OfferWithGroups>, anyhow::Error> {
    let group_ids = offers
        .iter()
        .flat_map(|offer| {
            offer
                .requested_groups
                .iter()
                .copied()
                .chain([offer.offered_group])
        })
        .collect::<BTreeSet<_>>();
    let author_ids = offers.iter().map(|offer| offer.author).collect::<BTreeSet<_>>();

    // Sorted by name, which carries over to the requested groups below.
    let groups = select_groups(connection, group_ids).await?;
    let authors = select_users(connection, &author_ids)
        .await?
        .into_iter()
        .map(|user| (user.id, user))
        .collect::<HashMap<UserId, User>>();

    Ok(offers
        .into_iter()
        .filter_map(|offer| {
            let Some(author) = authors.get(&offer.author).cloned() else {
                warn!("Author {:?} of offer {:?} does not exist", offer.author, offer.id);
                return None;
            };

            let Some(offered_group) = find_group(&groups, offer.offered_group) else {
                warn!(
                    "Offered group {:?} of offer {:?} does not exist",
                    offer.offered_group, offer.id
                );
                return None;
            };

            let requested_groups = groups
                .iter()
                .filter(|group| offer.requested_groups.contains(&group.id))
                .cloned()
                .collect();

            Some(OfferWithGroups {
                offer,
                author,
                offered_group,
                requested_groups,
            })
        })
        .collect())
}

fn find_group(groups: &[Group], id: GroupId) -> Option<Group> {
    groups.iter().find(|group| group.id == id).cloned()
}

#[derive(Debug, FromRow)]
pub struct SqlOffer {
    id: i64,
    exchange_id: i64,
    author: i64,
    offered_group: i64,
    submitted_at: String,
    accepted_by: Option<i64>,
    accepted_group: Option<i64>,
}

impl DBConvertible for Offer {
    type DBType = (SqlOffer, Vec<i64>);

    fn to_db(&self) -> Result<Self::DBType, DBToConversionError> {
        let (accepted_by, accepted_group) = self.state.to_db()?;

        Ok((
            SqlOffer {
                id: self.id.to_db()?,
                exchange_id: self.exchange_id.to_db()?,
                author: self.author.to_db()?,
                offered_group: self.offered_group.to_db()?,
                submitted_at: self.submitted_at.to_db()?,
                accepted_by,
                accepted_group,
            },
            self.requested_groups
                .iter()
                .map(|group| group.to_db())
                .collect::<Result<_, _>>()?,
        ))
    }

    fn from_db(value: &Self::DBType) -> Result<Self, DBFromConversionError> {
        let (offer, requested_groups) = value;

        Ok(Offer {
            id: OfferId::from_db(&offer.id)?,
            exchange_id: ExchangeId::from_db(&offer.exchange_id)?,
            author: UserId::from_db(&offer.author)?,
            offered_group: GroupId::from_db(&offer.offered_group)?,
            requested_groups: requested_groups
                .iter()
                .map(GroupId::from_db)
                .collect::<Result<_, _>>()?,
            submitted_at: UtcDateTime::from_db(&offer.submitted_at)?,
            state: OfferState::from_db(&(offer.accepted_by, offer.accepted_group))?,
        })
    }
}
