use std::marker::PhantomData;

use sqlx::{
    postgres::{PgListener, PgPoolOptions},
    types::Json,
    PgPool,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::{
    error::StoreError,
    models::{Collector, Customer, Package, Payment, PendingCollector, Transfer},
    repository::{Change, Document, Repository, Result, Store},
};

const FEED_CAPACITY: usize = 256;

pub async fn establish_connection(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!(max_connections, "Connecting to database");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// A collection stored as `(id, data jsonb)` rows in the table of the same name.
pub struct PgCollection<T: Document> {
    pool: PgPool,
    feed: broadcast::Sender<Change<T>>,
    _doc: PhantomData<fn() -> T>,
}

impl<T: Document> Clone for PgCollection<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            feed: self.feed.clone(),
            _doc: PhantomData,
        }
    }
}

impl<T: Document> PgCollection<T> {
    pub fn new(pool: PgPool) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            pool,
            feed,
            _doc: PhantomData,
        }
    }

    /// Notification channel filled by the `notify_collection_change` trigger.
    pub fn channel() -> String {
        format!("{}_changes", T::COLLECTION)
    }

    /// Forward trigger notifications for this table into the live feed.
    pub async fn spawn_feed(&self) -> Result<()> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&Self::channel()).await?;

        let feed = self.feed.clone();
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        match serde_json::from_str::<Change<T>>(notification.payload()) {
                            Ok(change) => {
                                let _ = feed.send(change);
                            }
                            Err(e) => warn!(
                                collection = T::COLLECTION,
                                "Dropping malformed change notification: {}", e
                            ),
                        }
                    }
                    Err(e) => {
                        error!(collection = T::COLLECTION, "Change listener stopped: {}", e);
                        break;
                    }
                }
            }
        });

        info!(collection = T::COLLECTION, "Live feed attached");
        Ok(())
    }

    fn not_found(id: &str) -> StoreError {
        StoreError::NotFound {
            collection: T::COLLECTION,
            id: id.to_string(),
        }
    }
}

impl<T: Document> Repository<T> for PgCollection<T> {
    async fn list(&self) -> Result<Vec<T>> {
        let sql = format!("SELECT data FROM {} ORDER BY created_at", T::COLLECTION);
        let rows: Vec<(Json<T>,)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(doc),)| doc).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        let sql = format!("SELECT data FROM {} WHERE id = $1", T::COLLECTION);
        let row: Option<(Json<T>,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(Json(doc),)| doc))
    }

    async fn insert(&self, doc: &T) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, data) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
            T::COLLECTION
        );
        let result = sqlx::query(&sql)
            .bind(doc.id())
            .bind(Json(doc))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                collection: T::COLLECTION,
                id: doc.id().to_string(),
            });
        }
        Ok(())
    }

    async fn update(&self, doc: &T) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET data = $2, updated_at = NOW() WHERE id = $1",
            T::COLLECTION
        );
        let result = sqlx::query(&sql)
            .bind(doc.id())
            .bind(Json(doc))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(doc.id()));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1", T::COLLECTION);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Change<T>> {
        self.feed.subscribe()
    }
}

#[derive(Clone)]
pub struct PgStore {
    customers: PgCollection<Customer>,
    collectors: PgCollection<Collector>,
    packages: PgCollection<Package>,
    payments: PgCollection<Payment>,
    transfers: PgCollection<Transfer>,
    provisioning: PgCollection<PendingCollector>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            customers: PgCollection::new(pool.clone()),
            collectors: PgCollection::new(pool.clone()),
            packages: PgCollection::new(pool.clone()),
            payments: PgCollection::new(pool.clone()),
            transfers: PgCollection::new(pool.clone()),
            provisioning: PgCollection::new(pool),
        }
    }

    /// Connect, migrate and attach the live feeds for payments and transfers.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = establish_connection(database_url, max_connections).await?;
        let store = Self::new(pool);
        store.payments.spawn_feed().await?;
        store.transfers.spawn_feed().await?;
        Ok(store)
    }
}

impl Store for PgStore {
    type Customers = PgCollection<Customer>;
    type Collectors = PgCollection<Collector>;
    type Packages = PgCollection<Package>;
    type Payments = PgCollection<Payment>;
    type Transfers = PgCollection<Transfer>;
    type Provisioning = PgCollection<PendingCollector>;

    fn customers(&self) -> &Self::Customers {
        &self.customers
    }

    fn collectors(&self) -> &Self::Collectors {
        &self.collectors
    }

    fn packages(&self) -> &Self::Packages {
        &self.packages
    }

    fn payments(&self) -> &Self::Payments {
        &self.payments
    }

    fn transfers(&self) -> &Self::Transfers {
        &self.transfers
    }

    fn provisioning(&self) -> &Self::Provisioning {
        &self.provisioning
    }
}
