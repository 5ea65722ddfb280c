//! Storage seam shared by the HTTP layer, the importer and the provisioning
//! saga. Each collection is a `Repository` of one document type; a `Store`
//! bundles the six collections.

use std::future::Future;

use futures::future::join_all;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    error::StoreError,
    models::{Collector, Customer, Package, Payment, PendingCollector, Transfer},
    utils::ChangeKind,
};

pub type Result<T> = std::result::Result<T, StoreError>;

pub trait Document: Clone + Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    /// Collection (and table) name.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

/// One write observed on a collection. `doc` is absent for deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct Change<T> {
    pub kind: ChangeKind,
    pub id: String,
    #[serde(default)]
    pub doc: Option<T>,
}

pub trait Repository<T: Document>: Send + Sync {
    /// Full snapshot of the collection.
    fn list(&self) -> impl Future<Output = Result<Vec<T>>> + Send;

    fn get(&self, id: &str) -> impl Future<Output = Result<Option<T>>> + Send;

    /// Fails with `Conflict` when the id is taken.
    fn insert(&self, doc: &T) -> impl Future<Output = Result<()>> + Send;

    /// Replaces the stored document; last write wins.
    fn update(&self, doc: &T) -> impl Future<Output = Result<()>> + Send;

    fn delete(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Live feed of writes made after the call.
    fn subscribe(&self) -> broadcast::Receiver<Change<T>>;

    /// Fetch a document, turning absence into `NotFound`.
    fn require(&self, id: &str) -> impl Future<Output = Result<T>> + Send {
        async move {
            self.get(id).await?.ok_or_else(|| StoreError::NotFound {
                collection: T::COLLECTION,
                id: id.to_string(),
            })
        }
    }

    /// Deletes every id concurrently and waits for all of them. Nothing is
    /// rolled back when some of the deletes fail.
    fn delete_many<'a>(
        &'a self,
        ids: &'a [String],
    ) -> impl Future<Output = Vec<(String, Result<()>)>> + Send + 'a {
        async move {
            let results = join_all(ids.iter().map(|id| self.delete(id))).await;
            ids.iter().cloned().zip(results).collect()
        }
    }
}

pub trait Store: Clone + Send + Sync + 'static {
    type Customers: Repository<Customer>;
    type Collectors: Repository<Collector>;
    type Packages: Repository<Package>;
    type Payments: Repository<Payment>;
    type Transfers: Repository<Transfer>;
    type Provisioning: Repository<PendingCollector>;

    fn customers(&self) -> &Self::Customers;
    fn collectors(&self) -> &Self::Collectors;
    fn packages(&self) -> &Self::Packages;
    fn payments(&self) -> &Self::Payments;
    fn transfers(&self) -> &Self::Transfers;
    fn provisioning(&self) -> &Self::Provisioning;
}
