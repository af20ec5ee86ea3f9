use std::collections::{BTreeSet, HashSet};

use sqlx::{query, query_as, query_scalar, FromRow, Pool, QueryBuilder, Sqlite, SqliteConnection};

use crate::models::{CourseId, Group, GroupId, UserId};

use super::conversion::{DBConvertible, DBFromConversionError, DBToConversionError};

/// Groups and group memberships of the hosting platform.
#[derive(Debug, Clone)]
pub struct GroupRepository {
    pool: Pool<Sqlite>,
}

impl GroupRepository {
    pub fn new(pool: Pool<Sqlite>) -> GroupRepository {
        GroupRepository { pool }
    }

    pub async fn create_group(&self, course: CourseId, name: &str) -> Result<Group, anyhow::Error> {
        let mut transaction = self.pool.begin().await?;

        let group = query_as::<_, SqlGroup>(
            r#"
                INSERT INTO groups (course_id, name)
                VALUES (?, ?)
                RETURNING id, course_id, name
            "#,
        )
        .bind(course.to_db()?)
        .bind(name)
        .fetch_one(&mut *transaction)
        .await?;

        transaction.commit().await?;

        Ok(Group::from_db(&group)?)
    }

    pub async fn get_group(&self, id: GroupId) -> Result<Option<Group>, anyhow::Error> {
        let group = query_as::<_, SqlGroup>("SELECT id, course_id, name FROM groups WHERE id = ?")
            .bind(id.to_db()?)
            .fetch_optional(&self.pool)
            .await?;

        match group {
            Some(group) => Ok(Some(Group::from_db(&group)?)),
            None => Ok(None),
        }
    }

    /// Removes a group together with its memberships.
    ///
    /// Exchange data referencing the group is left alone; see
    /// [`crate::cleanup::CascadeCleanup::on_group_deleted`].
    pub async fn delete_group(&self, id: GroupId) -> Result<bool, anyhow::Error> {
        let mut transaction = self.pool.begin().await?;

        let id = id.to_db()?;
        query("DELETE FROM group_members WHERE group_id = ?")
            .bind(id)
            .execute(&mut *transaction)
            .await?;
        let deleted = query("DELETE FROM groups WHERE id = ?")
            .bind(id)
            .execute(&mut *transaction)
            .await?
            .rows_affected();

        transaction.commit().await?;

        Ok(deleted > 0)
    }

    pub async fn groups_of(&self, user: UserId) -> Result<HashSet<GroupId>, anyhow::Error> {
        let mut connection = self.pool.acquire().await?;
        select_groups_of(&mut connection, user).await
    }

    pub async fn members_of(&self, group: GroupId) -> Result<BTreeSet<UserId>, anyhow::Error> {
        let members = query_scalar::<_, i64>("SELECT user_id FROM group_members WHERE group_id = ?")
            .bind(group.to_db()?)
            .fetch_all(&self.pool)
            .await?;

        Ok(members
            .iter()
            .map(UserId::from_db)
            .collect::<Result<_, _>>()?)
    }

    pub async fn add_member(&self, group: GroupId, user: UserId) -> Result<bool, anyhow::Error> {
        let mut connection = self.pool.acquire().await?;
        insert_member(&mut connection, group, user).await
    }

    pub async fn remove_member(&self, group: GroupId, user: UserId) -> Result<bool, anyhow::Error> {
        let mut connection = self.pool.acquire().await?;
        delete_member(&mut connection, group, user).await
    }
}

pub(crate) async fn select_groups_of(
    connection: &mut SqliteConnection,
    user: UserId,
) -> Result<HashSet<GroupId>, anyhow::Error> {
    let groups = query_scalar::<_, i64>("SELECT group_id FROM group_members WHERE user_id = ?")
        .bind(user.to_db()?)
        .fetch_all(&mut *connection)
        .await?;

    Ok(groups
        .iter()
        .map(GroupId::from_db)
        .collect::<Result<_, _>>()?)
}

/// Loads the given groups sorted by name. Unknown ids are skipped.
pub(crate) async fn select_groups(
    connection: &mut SqliteConnection,
    ids: impl IntoIterator<Item = GroupId>,
) -> Result<Vec<Group>, anyhow::Error> {
    let ids = ids
        .into_iter()
        .map(|id| id.to_db())
        .collect::<Result<Vec<_>, _>>()?;

    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new("SELECT id, course_id, name FROM groups WHERE id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(") ORDER BY name, id");

    let groups = builder
        .build_query_as::<SqlGroup>()
        .fetch_all(&mut *connection)
        .await?;

    Ok(groups
        .iter()
        .map(Group::from_db)
        .collect::<Result<_, _>>()?)
}

/// Returns false if the user already was a member.
pub(crate) async fn insert_member(
    connection: &mut SqliteConnection,
    group: GroupId,
    user: UserId,
) -> Result<bool, anyhow::Error> {
    let inserted = query(
        r#"
            INSERT INTO group_members (group_id, user_id)
            VALUES (?, ?)
            ON CONFLICT (group_id, user_id) DO NOTHING
        "#,
    )
    .bind(group.to_db()?)
    .bind(user.to_db()?)
    .execute(&mut *connection)
    .await?
    .rows_affected();

    Ok(inserted > 0)
}

/// Returns false if the user was not a member.
pub(crate) async fn delete_member(
    connection: &mut SqliteConnection,
    group: GroupId,
    user: UserId,
) -> Result<bool, anyhow::Error> {
    let deleted = query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
        .bind(group.to_db()?)
        .bind(user.to_db()?)
        .execute(&mut *connection)
        .await?
        .rows_affected();

    Ok(deleted > 0)
}

#[derive(Debug, FromRow)]
pub struct SqlGroup {
    id: i64,
    course_id: i64,
    name: String,
}

impl DBConvertible for Group {
    type DBType = SqlGroup;

    fn to_db(&self) -> Result<Self::DBType, DBToConversionError> {
        Ok(SqlGroup {
            id: self.id.to_db()?,
            course_id: self.course.to_db()?,
            name: self.name.clone(),
        })
    }

    fn from_db(value: &Self::DBType) -> Result<Self, DBFromConversionError> {
        Ok(Group {
            id: GroupId::from_db(&value.id)?,
            course: CourseId::from_db(&value.course_id)?,
            name: value.name.clone(),
        })
    }
}
