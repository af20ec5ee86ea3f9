use std::collections::BTreeSet;

use sqlx::{query, query_as, query_scalar, FromRow, Pool, QueryBuilder, Sqlite, SqliteConnection};

use crate::models::{Course, CourseId, Role, User, UserId};

use super::conversion::{DBConvertible, DBFromConversionError, DBToConversionError};

/// Users, courses and course roles of the hosting platform.
#[derive(Debug, Clone)]
pub struct PlatformRepository {
    pool: Pool<Sqlite>,
}

impl PlatformRepository {
    pub fn new(pool: Pool<Sqlite>) -> PlatformRepository {
        PlatformRepository { pool }
    }

    pub async fn create_course(&self, full_name: &str) -> Result<Course, anyhow::Error> {
        let course = query_as::<_, SqlCourse>(
            "INSERT INTO courses (full_name) VALUES (?) RETURNING id, full_name",
        )
        .bind(full_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(Course::from_db(&course)?)
    }

    pub async fn get_course(&self, id: CourseId) -> Result<Option<Course>, anyhow::Error> {
        let mut connection = self.pool.acquire().await?;
        select_course(&mut connection, id).await
    }

    pub async fn create_user(&self, first_name: &str, last_name: &str) -> Result<User, anyhow::Error> {
        let user = query_as::<_, SqlUser>(
            r#"
                INSERT INTO users (first_name, last_name)
                VALUES (?, ?)
                RETURNING id, first_name, last_name
            "#,
        )
        .bind(first_name)
        .bind(last_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(User::from_db(&user)?)
    }

    pub async fn get_user(&self, id: UserId) -> Result<Option<User>, anyhow::Error> {
        let mut connection = self.pool.acquire().await?;
        select_user(&mut connection, id).await
    }

    pub async fn assign_role(
        &self,
        course: CourseId,
        user: UserId,
        role: Role,
    ) -> Result<(), anyhow::Error> {
        query(
            r#"
                INSERT INTO role_assignments (course_id, user_id, role)
                VALUES (?, ?, ?)
                ON CONFLICT (course_id, user_id, role) DO NOTHING
            "#,
        )
        .bind(course.to_db()?)
        .bind(user.to_db()?)
        .bind(role.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn user_has_role(
        &self,
        course: CourseId,
        user: UserId,
        role: Role,
    ) -> Result<bool, anyhow::Error> {
        let has_role = query_scalar::<_, bool>(
            r#"
                SELECT EXISTS (
                    SELECT 1 FROM role_assignments
                    WHERE course_id = ? AND user_id = ? AND role = ?
                )
            "#,
        )
        .bind(course.to_db()?)
        .bind(user.to_db()?)
        .bind(role.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(has_role)
    }
}

pub(crate) async fn select_course(
    connection: &mut SqliteConnection,
    id: CourseId,
) -> Result<Option<Course>, anyhow::Error> {
    let course = query_as::<_, SqlCourse>("SELECT id, full_name FROM courses WHERE id = ?")
        .bind(id.to_db()?)
        .fetch_optional(&mut *connection)
        .await?;

    match course {
        Some(course) => Ok(Some(Course::from_db(&course)?)),
        None => Ok(None),
    }
}

pub(crate) async fn select_user(
    connection: &mut SqliteConnection,
    id: UserId,
) -> Result<Option<User>, anyhow::Error> {
    let user = query_as::<_, SqlUser>("SELECT id, first_name, last_name FROM users WHERE id = ?")
        .bind(id.to_db()?)
        .fetch_optional(&mut *connection)
        .await?;

    match user {
        Some(user) => Ok(Some(User::from_db(&user)?)),
        None => Ok(None),
    }
}

pub(crate) async fn select_users(
    connection: &mut SqliteConnection,
    ids: &BTreeSet<UserId>,
) -> Result<Vec<User>, anyhow::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder =
        QueryBuilder::<Sqlite>::new("SELECT id, first_name, last_name FROM users WHERE id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.to_db()?);
    }
    separated.push_unseparated(")");

    let users = builder
        .build_query_as::<SqlUser>()
        .fetch_all(&mut *connection)
        .await?;

    Ok(users
        .iter()
        .map(User::from_db)
        .collect::<Result<_, _>>()?)
}

#[derive(Debug, FromRow)]
pub struct SqlCourse {
    id: i64,
    full_name: String,
}

#[derive(Debug, FromRow)]
pub struct SqlUser {
    id: i64,
    first_name: String,
    last_name: String,
}

impl DBConvertible for Course {
    type DBType = SqlCourse;

    fn to_db(&self) -> Result<Self::DBType, DBToConversionError> {
        Ok(SqlCourse {
            id: self.id.to_db()?,
            full_name: self.full_name.clone(),
        })
    }

    fn from_db(value: &Self::DBType) -> Result<Self, DBFromConversionError> {
        Ok(Course {
            id: CourseId::from_db(&value.id)?,
            full_name: value.full_name.clone(),
        })
    }
}

impl DBConvertible for User {
    type DBType = SqlUser;

    fn to_db(&self) -> Result<Self::DBType, DBToConversionError> {
        Ok(SqlUser {
            id: self.id.to_db()?,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        })
    }

    fn from_db(value: &Self::DBType) -> Result<Self, DBFromConversionError> {
        Ok(User {
            id: UserId::from_db(&value.id)?,
            first_name: value.first_name.clone(),
            last_name: value.last_name.clone(),
        })
    }
}
