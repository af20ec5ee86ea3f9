//! Shared database fixture for tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::PathBuf,
    sync::atomic::{AtomicU32, Ordering},
};

use sqlx::SqlitePool;

use crate::{
    database::{setup_database, setup_in_memory_database},
    models::{
        types::UtcDateTime, Course, Exchange, Group, GroupId, NewExchange, NewOffer, Offer, User,
        UserId,
    },
    repository::{ExchangeRepository, GroupRepository, OfferRepository, PlatformRepository},
};

/// One course with groups A, B and C.
///
/// u1 is in A, u2 and u4 are in B, u3 is in C.
pub(crate) struct Fixture {
    pub pool: SqlitePool,
    pub platform: PlatformRepository,
    pub groups: GroupRepository,
    pub exchanges: ExchangeRepository,
    pub offers: OfferRepository,
    pub course: Course,
    pub u1: User,
    pub u2: User,
    pub u3: User,
    pub u4: User,
    pub a: Group,
    pub b: Group,
    pub c: Group,
}

/// A database file in the system temp directory, removed on drop.
pub(crate) struct TempDatabase {
    path: PathBuf,
}

impl TempDatabase {
    pub fn new() -> TempDatabase {
        static NEXT: AtomicU32 = AtomicU32::new(0);

        let path = std::env::temp_dir().join(format!(
            "group-exchange-test-{}-{}.db",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        let database = TempDatabase { path };
        database.remove_files();
        database
    }

    pub fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    fn remove_files(&self) {
        for suffix in ["", "-journal", "-wal", "-shm"] {
            let mut path = self.path.clone().into_os_string();
            path.push(suffix);
            let _ = fs::remove_file(path);
        }
    }
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        self.remove_files();
    }
}

impl Fixture {
    pub async fn new() -> Fixture {
        Fixture::with_pool(setup_in_memory_database().await.unwrap()).await
    }

    /// A fixture on a database file shared by `max_connections` connections,
    /// so that transactions can actually overlap.
    pub async fn on_disk(max_connections: u32) -> (Fixture, TempDatabase) {
        let database = TempDatabase::new();
        let pool = setup_database(&database.url(), max_connections)
            .await
            .unwrap();
        (Fixture::with_pool(pool).await, database)
    }

    async fn with_pool(pool: SqlitePool) -> Fixture {
        let platform = PlatformRepository::new(pool.clone());
        let groups = GroupRepository::new(pool.clone());

        let course = platform.create_course("Algorithms I").await.unwrap();

        let u1 = platform.create_user("Ada", "Lovelace").await.unwrap();
        let u2 = platform.create_user("Alan", "Turing").await.unwrap();
        let u3 = platform.create_user("Grace", "Hopper").await.unwrap();
        let u4 = platform.create_user("Edsger", "Dijkstra").await.unwrap();

        let a = groups.create_group(course.id, "A").await.unwrap();
        let b = groups.create_group(course.id, "B").await.unwrap();
        let c = groups.create_group(course.id, "C").await.unwrap();

        groups.add_member(a.id, u1.id).await.unwrap();
        groups.add_member(b.id, u2.id).await.unwrap();
        groups.add_member(c.id, u3.id).await.unwrap();
        groups.add_member(b.id, u4.id).await.unwrap();

        Fixture {
            exchanges: ExchangeRepository::new(pool.clone()),
            offers: OfferRepository::new(pool.clone()),
            pool,
            platform,
            groups,
            course,
            u1,
            u2,
            u3,
            u4,
            a,
            b,
            c,
        }
    }

    pub fn new_exchange(&self, students_only: bool) -> NewExchange {
        NewExchange {
            course: self.course.id,
            name: "Tutorial swap".to_string(),
            time_window: None,
            anonymous: false,
            students_only,
            exchange_limit: 0,
            available_groups: [self.a.id, self.b.id, self.c.id].into(),
        }
    }

    /// An always-open exchange trading A, B and C.
    pub async fn exchange(&self, students_only: bool) -> Exchange {
        self.exchanges
            .create_exchange(&self.new_exchange(students_only))
            .await
            .unwrap()
    }

    pub fn new_offer(
        &self,
        exchange: &Exchange,
        author: UserId,
        offered_group: GroupId,
        requested_groups: &[GroupId],
    ) -> NewOffer {
        NewOffer {
            exchange_id: exchange.id,
            author,
            offered_group,
            requested_groups: requested_groups.iter().copied().collect(),
            submitted_at: UtcDateTime::now(),
        }
    }

    pub async fn create_offer(
        &self,
        exchange: &Exchange,
        author: UserId,
        offered_group: GroupId,
        requested_groups: &[GroupId],
    ) -> Offer {
        let new_offer = self.new_offer(exchange, author, offered_group, requested_groups);
        self.offers.create_offer(exchange, &new_offer).await.unwrap()
    }

    /// Members of A, B and C.
    pub async fn memberships(&self) -> BTreeMap<GroupId, BTreeSet<UserId>> {
        let mut memberships = BTreeMap::new();
        for group in [self.a.id, self.b.id, self.c.id] {
            memberships.insert(group, self.groups.members_of(group).await.unwrap());
        }
        memberships
    }
}
