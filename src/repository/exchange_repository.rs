use sqlx::{query, query_as, query_scalar, FromRow, Pool, Sqlite, SqliteConnection};
use tracing::{info, warn};

use crate::{
    database::BEGIN_IMMEDIATE,
    error::{validation_err, ExchangeError},
    models::{
        types::UtcDateTime, CourseId, Exchange, ExchangeId, Group, GroupId, NewExchange,
        TimeWindow,
    },
};

use super::{
    conversion::{DBConvertible, DBFromConversionError, DBToConversionError},
    group_repository::select_groups,
};

/// Minimum number of groups an exchange needs to be useful.
const MIN_AVAILABLE_GROUPS: usize = 2;

#[derive(Debug, Clone)]
pub struct ExchangeRepository {
    pool: Pool<Sqlite>,
}

impl ExchangeRepository {
    pub fn new(pool: Pool<Sqlite>) -> ExchangeRepository {
        ExchangeRepository { pool }
    }

    #[tracing::instrument(skip_all, fields(course = ?new_exchange.course, name = %new_exchange.name))]
    pub async fn create_exchange(&self, new_exchange: &NewExchange) -> Result<Exchange, ExchangeError> {
        let mut transaction = self.pool.begin_with(BEGIN_IMMEDIATE).await?;

        check_available_groups(&mut transaction, new_exchange).await?;

        let (time_open, time_close) = time_window_to_db(&new_exchange.time_window)?;

        let id = query_scalar::<_, i64>(
            r#"
                INSERT INTO exchanges (
                    course_id,
                    name,
                    time_open,
                    time_close,
                    anonymous,
                    students_only,
                    exchange_limit)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                RETURNING id
            "#,
        )
        .bind(new_exchange.course.to_db()?)
        .bind(&new_exchange.name)
        .bind(time_open)
        .bind(time_close)
        .bind(new_exchange.anonymous)
        .bind(new_exchange.students_only)
        .bind(new_exchange.exchange_limit.to_db()?)
        .fetch_one(&mut *transaction)
        .await?;

        insert_available_groups(&mut transaction, id, new_exchange).await?;

        let exchange = select_exchange(&mut transaction, ExchangeId::from_db(&id)?)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Exchange {id} vanished right after insert"))?;

        transaction.commit().await?;

        info!("Created exchange {:?}", exchange.id);

        Ok(exchange)
    }

    /// Replaces the settings and the available groups of an exchange.
    ///
    /// Offers are kept as they are, even those referencing groups that are no
    /// longer available.
    #[tracing::instrument(skip(self, new_exchange))]
    pub async fn update_exchange(
        &self,
        id: ExchangeId,
        new_exchange: &NewExchange,
    ) -> Result<Exchange, ExchangeError> {
        let mut transaction = self.pool.begin_with(BEGIN_IMMEDIATE).await?;

        check_available_groups(&mut transaction, new_exchange).await?;

        let (time_open, time_close) = time_window_to_db(&new_exchange.time_window)?;
        let db_id = id.to_db()?;

        let updated = query(
            r#"
                UPDATE exchanges SET
                    course_id = ?,
                    name = ?,
                    time_open = ?,
                    time_close = ?,
                    anonymous = ?,
                    students_only = ?,
                    exchange_limit = ?
                WHERE id = ?
            "#,
        )
        .bind(new_exchange.course.to_db()?)
        .bind(&new_exchange.name)
        .bind(time_open)
        .bind(time_close)
        .bind(new_exchange.anonymous)
        .bind(new_exchange.students_only)
        .bind(new_exchange.exchange_limit.to_db()?)
        .bind(db_id)
        .execute(&mut *transaction)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(ExchangeError::ExchangeNotFound(id));
        }

        query("DELETE FROM exchange_groups WHERE exchange_id = ?")
            .bind(db_id)
            .execute(&mut *transaction)
            .await?;
        insert_available_groups(&mut transaction, db_id, new_exchange).await?;

        let exchange = select_exchange(&mut transaction, id)
            .await?
            .ok_or(ExchangeError::ExchangeNotFound(id))?;

        transaction.commit().await?;

        Ok(exchange)
    }

    /// Deletes the exchange with all its offers and available groups.
    #[tracing::instrument(skip(self))]
    pub async fn delete_exchange(&self, id: ExchangeId) -> Result<bool, anyhow::Error> {
        let mut transaction = self.pool.begin().await?;

        let id = id.to_db()?;

        query(
            r#"
                DELETE FROM offer_requested_groups
                WHERE offer_id IN (SELECT id FROM offers WHERE exchange_id = ?)
            "#,
        )
        .bind(id)
        .execute(&mut *transaction)
        .await?;

        query("DELETE FROM offers WHERE exchange_id = ?")
            .bind(id)
            .execute(&mut *transaction)
            .await?;

        query("DELETE FROM exchange_groups WHERE exchange_id = ?")
            .bind(id)
            .execute(&mut *transaction)
            .await?;

        let query_result = query("DELETE FROM exchanges WHERE id = ?")
            .bind(id)
            .execute(&mut *transaction)
            .await?;

        transaction.commit().await?;

        let exchanges_deleted = query_result.rows_affected();

        if exchanges_deleted > 1 {
            warn!("Deleted more than one exchange with id {id}");
        }

        Ok(exchanges_deleted > 0)
    }

    pub async fn get_exchange(&self, id: ExchangeId) -> Result<Option<Exchange>, anyhow::Error> {
        let mut transaction = self.pool.begin().await?;
        let exchange = select_exchange(&mut transaction, id).await?;
        transaction.commit().await?;

        Ok(exchange)
    }

    pub async fn get_exchanges(&self) -> Result<Vec<Exchange>, anyhow::Error> {
        let mut transaction = self.pool.begin().await?;

        let ids = query_scalar::<_, i64>("SELECT id FROM exchanges ORDER BY course_id, name, id")
            .fetch_all(&mut *transaction)
            .await?;

        let mut exchanges = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(exchange) = select_exchange(&mut transaction, ExchangeId::from_db(&id)?).await? {
                exchanges.push(exchange);
            }
        }

        transaction.commit().await?;

        Ok(exchanges)
    }

    /// Drops the group from every exchange it was available in.
    pub async fn delete_group_availability(&self, group: GroupId) -> Result<u64, anyhow::Error> {
        let deleted = query("DELETE FROM exchange_groups WHERE group_id = ?")
            .bind(group.to_db()?)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }
}

pub(crate) async fn select_exchange(
    connection: &mut SqliteConnection,
    id: ExchangeId,
) -> Result<Option<Exchange>, anyhow::Error> {
    let id = id.to_db()?;

    let exchange = query_as::<_, SqlExchange>(
        r#"
            SELECT
                id,
                course_id,
                name,
                time_open,
                time_close,
                anonymous,
                students_only,
                exchange_limit
            FROM exchanges
            WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *connection)
    .await?;

    let Some(exchange) = exchange else {
        return Ok(None);
    };

    let group_ids = query_scalar::<_, i64>("SELECT group_id FROM exchange_groups WHERE exchange_id = ?")
        .bind(id)
        .fetch_all(&mut *connection)
        .await?
        .iter()
        .map(GroupId::from_db)
        .collect::<Result<Vec<_>, _>>()?;

    let groups = select_groups(connection, group_ids).await?;

    Ok(Some(Exchange::from_db(&(exchange, groups))?))
}

async fn check_available_groups(
    connection: &mut SqliteConnection,
    new_exchange: &NewExchange,
) -> Result<(), ExchangeError> {
    if new_exchange.available_groups.len() < MIN_AVAILABLE_GROUPS {
        return Err(validation_err(
            "groups",
            "You should select at least two groups for the exchange",
        ));
    }

    let groups = select_groups(connection, new_exchange.available_groups.iter().copied()).await?;

    for id in &new_exchange.available_groups {
        match groups.iter().find(|g| g.id == *id) {
            Some(group) if group.course == new_exchange.course => {}
            _ => {
                return Err(validation_err(
                    "groups",
                    format!("Group {} does not belong to this course", id.0),
                ))
            }
        }
    }

    Ok(())
}

async fn insert_available_groups(
    connection: &mut SqliteConnection,
    exchange_id: i64,
    new_exchange: &NewExchange,
) -> Result<(), anyhow::Error> {
    for group in &new_exchange.available_groups {
        query("INSERT INTO exchange_groups (exchange_id, group_id) VALUES (?, ?)")
            .bind(exchange_id)
            .bind(group.to_db()?)
            .execute(&mut *connection)
            .await?;
    }

    Ok(())
}

fn time_window_to_db(
    time_window: &Option<TimeWindow>,
) -> Result<(Option<String>, Option<String>), DBToConversionError> {
    match time_window {
        Some(window) => Ok((Some(window.open.to_db()?), Some(window.close.to_db()?))),
        None => Ok((None, None)),
    }
}

#[derive(Debug, FromRow)]
pub struct SqlExchange {
    id: i64,
    course_id: i64,
    name: String,
    time_open: Option<String>,
    time_close: Option<String>,
    anonymous: bool,
    students_only: bool,
    exchange_limit: i64,
}

impl DBConvertible for Exchange {
    type DBType = (SqlExchange, Vec<Group>);

    fn to_db(&self) -> Result<Self::DBType, DBToConversionError> {
        let (time_open, time_close) = time_window_to_db(&self.time_window)?;

        Ok((
            SqlExchange {
                id: self.id.to_db()?,
                course_id: self.course.to_db()?,
                name: self.name.clone(),
                time_open,
                time_close,
                anonymous: self.anonymous,
                students_only: self.students_only,
                exchange_limit: self.exchange_limit.to_db()?,
            },
            self.available_groups.clone(),
        ))
    }

    fn from_db(value: &Self::DBType) -> Result<Self, DBFromConversionError> {
        let (exchange, groups) = value;

        // A window is only in effect when both ends are set.
        let time_window = match (&exchange.time_open, &exchange.time_close) {
            (Some(open), Some(close)) => Some(TimeWindow {
                open: UtcDateTime::from_db(open)?,
                close: UtcDateTime::from_db(close)?,
            }),
            _ => None,
        };

        Ok(Exchange {
            id: ExchangeId::from_db(&exchange.id)?,
            course: CourseId::from_db(&exchange.course_id)?,
            name: exchange.name.clone(),
            time_window,
            anonymous: exchange.anonymous,
            students_only: exchange.students_only,
            exchange_limit: u32::from_db(&exchange.exchange_limit)?,
            available_groups: groups.clone(),
        })
    }
}
