//! Collector creation spans the identity service and the document store.
//!
//! A pending marker is written before the credential exists and removed once
//! the profile document is in place. Markers left behind by a failure part
//! way through are settled by `reconcile`.

use std::time::Duration;

use chrono::Utc;
use common::{
    models::{new_document_id, Collector, PendingCollector},
    Repository, Store, StoreError,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use validator::Validate;

use crate::{
    error::{ApiError, Result},
    identity::{IdentityProvider, NewCredential},
};

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CollectorForm {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Phone is required"))]
    pub phone: String,
    #[validate(email(message = "Enter a valid email"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[serde(default)]
    pub address: Option<String>,
}

/// Create the credential and the profile document for a new collector.
pub async fn create_collector<S: Store, I: IdentityProvider>(
    store: &S,
    identity: &I,
    form: CollectorForm,
) -> Result<Collector> {
    form.validate()?;

    let mut marker = PendingCollector {
        id: new_document_id(),
        name: form.name.trim().to_string(),
        phone: form.phone.trim().to_string(),
        email: form.email.trim().to_string(),
        password: form.password,
        address: form.address.filter(|a| !a.trim().is_empty()),
        uid: None,
        created_at: Utc::now(),
    };
    store.provisioning().insert(&marker).await?;
    info!(marker = %marker.id, email = %marker.email, "Collector provisioning started");

    let credential = NewCredential {
        email: marker.email.clone(),
        password: marker.password.clone(),
        display_name: marker.name.clone(),
    };
    let uid = match identity.create_user(&credential).await {
        Ok(uid) => uid,
        Err(e) if e.is_rejection() => {
            finish(store, &marker.id).await;
            return Err(e.into());
        }
        Err(e) => {
            // The account may exist anyway; reconciliation looks it up by email.
            warn!(marker = %marker.id, "Credential outcome unknown, keeping marker: {}", e);
            return Err(e.into());
        }
    };

    marker.uid = Some(uid.clone());
    if let Err(e) = store.provisioning().update(&marker).await {
        // Reconciliation can still find the credential by email.
        warn!(marker = %marker.id, %uid, "Failed to record uid on marker: {}", e);
    }

    let collector = marker.to_collector(&uid);
    if let Err(e) = store.collectors().insert(&collector).await {
        error!(marker = %marker.id, %uid, "Collector profile write failed: {}", e);
        return Err(e.into());
    }

    finish(store, &marker.id).await;
    info!(%uid, numeric_id = collector.numeric_id, "Collector provisioned");
    Ok(collector)
}

async fn finish<S: Store>(store: &S, marker_id: &str) {
    match store.provisioning().delete(marker_id).await {
        Ok(()) => {}
        Err(StoreError::NotFound { .. }) => {}
        Err(e) => warn!(marker = %marker_id, "Failed to drop provisioning marker: {}", e),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Markers whose profile document was written now.
    pub completed: usize,
    /// Markers dropped because the profile existed or no credential was made.
    pub discarded: usize,
    /// Markers younger than the grace period.
    pub pending: usize,
    pub failed: usize,
}

/// Settle provisioning markers older than `grace`.
pub async fn reconcile<S: Store, I: IdentityProvider>(
    store: &S,
    identity: &I,
    grace: Duration,
) -> Result<ReconcileReport> {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(grace).map_err(ApiError::internal)?;
    let mut report = ReconcileReport::default();

    for marker in store.provisioning().list().await? {
        if marker.created_at > cutoff {
            report.pending += 1;
            continue;
        }

        match settle(store, identity, &marker).await {
            Ok(Settled::Completed) => report.completed += 1,
            Ok(Settled::Discarded) => report.discarded += 1,
            Err(e) => {
                error!(marker = %marker.id, "Reconciliation failed: {}", e);
                report.failed += 1;
            }
        }
    }

    info!(
        completed = report.completed,
        discarded = report.discarded,
        pending = report.pending,
        failed = report.failed,
        "Collector reconciliation finished"
    );
    Ok(report)
}

enum Settled {
    Completed,
    Discarded,
}

async fn settle<S: Store, I: IdentityProvider>(
    store: &S,
    identity: &I,
    marker: &PendingCollector,
) -> Result<Settled> {
    let uid = match &marker.uid {
        Some(uid) => Some(uid.clone()),
        None => identity
            .find_by_email(&marker.email)
            .await?
            .map(|user| user.uid),
    };

    let Some(uid) = uid else {
        info!(marker = %marker.id, "No credential behind marker, discarding");
        finish(store, &marker.id).await;
        return Ok(Settled::Discarded);
    };

    if store.collectors().get(&uid).await?.is_some() {
        finish(store, &marker.id).await;
        return Ok(Settled::Discarded);
    }

    let collector: Collector = marker.to_collector(&uid);
    store.collectors().insert(&collector).await?;
    finish(store, &marker.id).await;
    info!(marker = %marker.id, %uid, "Completed orphaned collector profile");
    Ok(Settled::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{self, IdentityError, IdentityUser, MemoryIdentity};
    use common::{link, memory::MemoryStore};

    /// Creates the account, then loses the reply.
    #[derive(Clone, Default)]
    struct LostReply(MemoryIdentity);

    impl IdentityProvider for LostReply {
        async fn list_users(&self) -> identity::Result<Vec<IdentityUser>> {
            self.0.list_users().await
        }

        async fn create_user(&self, credential: &NewCredential) -> identity::Result<String> {
            self.0.create_user(credential).await?;
            Err(IdentityError::Remote {
                status: 504,
                message: "deadline exceeded".into(),
            })
        }

        async fn delete_user(&self, uid: &str) -> identity::Result<()> {
            self.0.delete_user(uid).await
        }

        async fn find_by_email(&self, email: &str) -> identity::Result<Option<IdentityUser>> {
            self.0.find_by_email(email).await
        }
    }

    fn form(email: &str) -> CollectorForm {
        CollectorForm {
            name: "Imran".into(),
            phone: "03210000000".into(),
            email: email.into(),
            password: "secret12".into(),
            address: None,
        }
    }

    fn stale_marker(email: &str, uid: Option<&str>) -> PendingCollector {
        PendingCollector {
            id: new_document_id(),
            name: "Orphan".into(),
            phone: "0300".into(),
            email: email.into(),
            password: "secret12".into(),
            address: None,
            uid: uid.map(str::to_string),
            created_at: Utc::now() - chrono::Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn creates_credential_and_profile() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let identity = MemoryIdentity::new();

        let collector = create_collector(&store, &identity, form("imran@example.com")).await?;

        assert_eq!(collector.numeric_id, link::numeric_id(&collector.id));
        assert!(store.collectors().get(&collector.id).await?.is_some());
        assert!(store.provisioning().list().await?.is_empty());
        assert_eq!(
            identity.password_of(&collector.id).await.as_deref(),
            Some("secret12")
        );
        Ok(())
    }

    #[tokio::test]
    async fn rejected_credential_drops_the_marker() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let identity = MemoryIdentity::new();
        create_collector(&store, &identity, form("taken@example.com")).await?;

        let err = create_collector(&store, &identity, form("taken@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.http_code, actix_web::http::StatusCode::CONFLICT);
        assert!(store.provisioning().list().await?.is_empty());
        assert_eq!(store.collectors().list().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_identity_keeps_marker_until_reconciled() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let identity = MemoryIdentity::new();
        identity.set_offline(true);

        assert!(create_collector(&store, &identity, form("x@example.com")).await.is_err());
        assert_eq!(store.provisioning().list().await?.len(), 1);
        assert!(store.collectors().list().await?.is_empty());

        identity.set_offline(false);
        let report = reconcile(&store, &identity, Duration::ZERO).await?;
        assert_eq!(report.discarded, 1);
        assert!(store.provisioning().list().await?.is_empty());
        assert!(store.collectors().list().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn lost_reply_is_completed_by_reconcile() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let identity = LostReply::default();

        let err = create_collector(&store, &identity, form("late@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.http_code, actix_web::http::StatusCode::BAD_GATEWAY);
        assert_eq!(store.provisioning().list().await?.len(), 1);
        assert_eq!(identity.list_users().await?.len(), 1);

        let report = reconcile(&store, &identity, Duration::ZERO).await?;
        assert_eq!(report.completed, 1);

        let uid = identity.find_by_email("late@example.com").await?.unwrap().uid;
        let collector = store.collectors().require(&uid).await?;
        assert_eq!(collector.numeric_id, link::numeric_id(&uid));
        assert!(store.provisioning().list().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn invalid_form_is_rejected_before_any_write() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let identity = MemoryIdentity::new();
        let mut bad = form("not-an-email");
        bad.password = "123".into();

        let err = create_collector(&store, &identity, bad).await.unwrap_err();
        assert!(err.body.fields.contains_key("email"));
        assert!(err.body.fields.contains_key("password"));
        assert!(store.provisioning().list().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn reconcile_completes_orphaned_credentials() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let identity = MemoryIdentity::new();
        identity
            .add_user(IdentityUser {
                uid: "uid-orphan".into(),
                email: Some("orphan@example.com".into()),
                display_name: Some("Orphan".into()),
                photo_url: None,
            })
            .await;
        store
            .provisioning()
            .insert(&stale_marker("orphan@example.com", None))
            .await?;
        store
            .provisioning()
            .insert(&stale_marker("ghost@example.com", None))
            .await?;

        let report = reconcile(&store, &identity, Duration::from_secs(300)).await?;

        assert_eq!(report.completed, 1);
        assert_eq!(report.discarded, 1);
        let collector = store.collectors().require("uid-orphan").await?;
        assert_eq!(collector.numeric_id, link::numeric_id("uid-orphan"));
        assert!(store.provisioning().list().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn reconcile_leaves_fresh_markers_alone() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let identity = MemoryIdentity::new();
        let mut fresh = stale_marker("fresh@example.com", Some("uid-7"));
        fresh.created_at = Utc::now();
        store.provisioning().insert(&fresh).await?;

        let report = reconcile(&store, &identity, Duration::from_secs(300)).await?;

        assert_eq!(report.pending, 1);
        assert_eq!(store.provisioning().list().await?.len(), 1);
        assert!(store.collectors().list().await?.is_empty());
        Ok(())
    }
}
