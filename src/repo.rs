use std::sync::Arc;

use diesel::sqlite::SqliteConnection;
use tokio::sync::RwLock;

use crate::db::{self, DbPool, Paste, User};
use crate::errors::Result;

/// Async handle over the metadata database.
///
/// Queries run on the blocking thread pool. One read-write lock guards the
/// whole handle: reads share it, every write holds it exclusively, which
/// keeps sqlite to a single writer at a time.
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
    lock: Arc<RwLock<()>>,
}

impl Repository {
    pub fn open(database_url: &str) -> Result<Self> {
        let pool = db::connect(database_url)?;
        log::info!("opened database at {database_url}");
        Ok(Repository {
            pool,
            lock: Arc::new(RwLock::new(())),
        })
    }

    pub async fn create_user(&self, username: String, password_hash: String) -> Result<User> {
        self.write(move |c| db::create_user(c, &username, &password_hash))
            .await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.read(db::list_users).await
    }

    pub async fn get_user(&self, username: String) -> Result<User> {
        self.read(move |c| db::get_user(c, &username)).await
    }

    pub async fn update_password(&self, username: String, password_hash: String) -> Result<()> {
        self.write(move |c| db::update_password(c, &username, &password_hash))
            .await
    }

    pub async fn refresh_token(&self, username: String) -> Result<String> {
        self.write(move |c| db::refresh_token(c, &username)).await
    }

    pub async fn put_paste(&self, paste: Paste) -> Result<()> {
        self.write(move |c| db::put_paste(c, &paste)).await
    }

    pub async fn get_paste(&self, id: String) -> Result<Paste> {
        self.read(move |c| db::get_paste(c, &id)).await
    }

    pub async fn delete_paste(&self, id: String) -> Result<()> {
        self.write(move |c| db::delete_paste(c, &id)).await
    }

    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.lock.clone().read_owned().await;
        self.run(guard, f).await
    }

    async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.lock.clone().write_owned().await;
        self.run(guard, f).await
    }

    /// The guard moves into the blocking task: it is held until the query
    /// returns, even when the calling future is dropped.
    async fn run<G, T, F>(&self, guard: G, f: F) -> Result<T>
    where
        G: Send + 'static,
        F: FnOnce(&SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let conn = pool.get()?;
            f(&*conn)
        })
        .await?
    }
}
