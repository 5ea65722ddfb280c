use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::{broadcast, RwLock};

use crate::{
    error::StoreError,
    models::{Collector, Customer, Package, Payment, PendingCollector, Transfer},
    repository::{Change, Document, Repository, Result, Store},
    utils::ChangeKind,
};

const FEED_CAPACITY: usize = 256;

/// In-process collection. Clones share the same documents and feed.
#[derive(Clone)]
pub struct MemoryCollection<T: Document> {
    docs: Arc<RwLock<BTreeMap<String, T>>>,
    feed: broadcast::Sender<Change<T>>,
}

impl<T: Document> Default for MemoryCollection<T> {
    fn default() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            docs: Arc::new(RwLock::new(BTreeMap::new())),
            feed,
        }
    }
}

impl<T: Document> MemoryCollection<T> {
    fn publish(&self, kind: ChangeKind, id: &str, doc: Option<T>) {
        // No receivers is not an error.
        let _ = self.feed.send(Change {
            kind,
            id: id.to_string(),
            doc,
        });
    }
}

impl<T: Document> Repository<T> for MemoryCollection<T> {
    async fn list(&self) -> Result<Vec<T>> {
        Ok(self.docs.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn insert(&self, doc: &T) -> Result<()> {
        let mut docs = self.docs.write().await;
        if docs.contains_key(doc.id()) {
            return Err(StoreError::Conflict {
                collection: T::COLLECTION,
                id: doc.id().to_string(),
            });
        }
        docs.insert(doc.id().to_string(), doc.clone());
        drop(docs);
        self.publish(ChangeKind::INSERT, doc.id(), Some(doc.clone()));
        Ok(())
    }

    async fn update(&self, doc: &T) -> Result<()> {
        let mut docs = self.docs.write().await;
        match docs.get_mut(doc.id()) {
            Some(slot) => *slot = doc.clone(),
            None => {
                return Err(StoreError::NotFound {
                    collection: T::COLLECTION,
                    id: doc.id().to_string(),
                })
            }
        }
        drop(docs);
        self.publish(ChangeKind::UPDATE, doc.id(), Some(doc.clone()));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let removed = self.docs.write().await.remove(id);
        if removed.is_none() {
            return Err(StoreError::NotFound {
                collection: T::COLLECTION,
                id: id.to_string(),
            });
        }
        self.publish(ChangeKind::DELETE, id, None);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Change<T>> {
        self.feed.subscribe()
    }
}

/// Store backed by process memory; used by `serve --in-memory` and tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    customers: MemoryCollection<Customer>,
    collectors: MemoryCollection<Collector>,
    packages: MemoryCollection<Package>,
    payments: MemoryCollection<Payment>,
    transfers: MemoryCollection<Transfer>,
    provisioning: MemoryCollection<PendingCollector>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    type Customers = MemoryCollection<Customer>;
    type Collectors = MemoryCollection<Collector>;
    type Packages = MemoryCollection<Package>;
    type Payments = MemoryCollection<Payment>;
    type Transfers = MemoryCollection<Transfer>;
    type Provisioning = MemoryCollection<PendingCollector>;

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

#[cfg(test)]
mod tests {
    use super::*;

    fn package(id: &str, price: f64) -> Package {
        Package {
            id: id.to_string(),
            name: format!("Plan {id}"),
            price,
            size: "10 Mbps".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_get_update_delete() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let packages = store.packages();

        packages.insert(&package("p1", 1500.0)).await?;
        assert_eq!(packages.get("p1").await?.unwrap().price, 1500.0);

        packages.update(&package("p1", 1800.0)).await?;
        assert_eq!(packages.require("p1").await?.price, 1800.0);

        packages.delete("p1").await?;
        assert!(packages.get("p1").await?.is_none());
        assert!(packages.delete("p1").await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.packages().insert(&package("p1", 1.0)).await?;
        let err = store.packages().insert(&package("p1", 2.0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn delete_many_reports_each_id() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.packages().insert(&package("a", 1.0)).await?;
        store.packages().insert(&package("b", 1.0)).await?;

        let ids = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        let results = store.packages().delete_many(&ids).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert!(results[2].1.is_ok());
        assert!(store.packages().list().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn subscribers_see_later_writes() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut feed = store.packages().subscribe();

        store.packages().insert(&package("p1", 1.0)).await?;
        store.packages().delete("p1").await?;

        let first = feed.recv().await?;
        assert_eq!(first.kind, ChangeKind::INSERT);
        assert_eq!(first.doc.unwrap().id, "p1");

        let second = feed.recv().await?;
        assert_eq!(second.kind, ChangeKind::DELETE);
        assert!(second.doc.is_none());
        Ok(())
    }
}
