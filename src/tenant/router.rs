use super::{TenantContext, TenantSlug};
use crate::store::{EntityKind, Scope, SharedStore, StoreError, Tenant, TenantStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OnceCell};
use tracing::{error, info};

const SHARED_DB_FILE: &str = "shared.sqlite3";
const TENANTS_DIR: &str = "tenants";

#[derive(Clone)]
pub enum StoreHandle {
    Shared(Arc<SharedStore>),
    Tenant(Arc<TenantStore>),
}

pub struct MigrationOutcome {
    pub slug: TenantSlug,
    pub result: Result<(), StoreError>,
}

pub struct TenantStorageRouter {
    shared: Arc<SharedStore>,
    tenants_dir: PathBuf,
    // A store is published only after its schema is fully applied.
    registry: Mutex<HashMap<TenantSlug, Arc<OnceCell<Arc<TenantStore>>>>>,
    provision_runs: AtomicUsize,
}

impl TenantStorageRouter {
    pub async fn open(data_dir: &Path) -> Result<Arc<Self>, StoreError> {
        let shared = SharedStore::open(&data_dir.join(SHARED_DB_FILE)).await?;
        let tenants_dir = data_dir.join(TENANTS_DIR);
        tokio::fs::create_dir_all(&tenants_dir).await?;

        Ok(Arc::new(Self {
            shared: Arc::new(shared),
            tenants_dir,
            registry: Mutex::new(HashMap::new()),
            provision_runs: AtomicUsize::new(0),
        }))
    }

    pub fn shared(&self) -> &Arc<SharedStore> {
        &self.shared
    }

    pub async fn resolve_for(
        &self,
        kind: EntityKind,
        ctx: &TenantContext,
    ) -> Result<StoreHandle, StoreError> {
        match kind.scope() {
            Scope::Shared => Ok(StoreHandle::Shared(self.shared.clone())),
            Scope::TenantScoped => {
                let slug = ctx.get().ok_or(StoreError::ContextMissing { kind })?;
                Ok(StoreHandle::Tenant(self.get_or_provision(slug).await?))
            }
        }
    }

    pub async fn tenant_store(
        &self,
        kind: EntityKind,
        ctx: &TenantContext,
    ) -> Result<Arc<TenantStore>, StoreError> {
        match self.resolve_for(kind, ctx).await? {
            StoreHandle::Tenant(store) => Ok(store),
            StoreHandle::Shared(_) => Err(StoreError::NotTenantScoped { kind }),
        }
    }

    async fn get_or_provision(&self, slug: &TenantSlug) -> Result<Arc<TenantStore>, StoreError> {
        let cell = {
            let mut registry = self.registry.lock().await;
            registry.entry(slug.clone()).or_default().clone()
        };

        let store = cell
            .get_or_try_init(|| async {
                let path = self.tenants_dir.join(format!("{}.sqlite3", slug));
                let store = TenantStore::new(slug.clone(), &path);
                store.apply_schema().await?;
                self.provision_runs.fetch_add(1, Ordering::SeqCst);
                info!("Provisioned store for tenant {}", slug);
                Ok::<_, StoreError>(Arc::new(store))
            })
            .await?;

        Ok(store.clone())
    }

    /// Registers the tenant in the shared store and provisions its store
    /// right away instead of waiting for the first tenant-scoped access.
    pub async fn register_tenant(&self, slug: &TenantSlug, name: &str) -> Result<Tenant, StoreError> {
        let tenant = self.shared.register_tenant(slug, name).await?;
        self.get_or_provision(slug).await?;
        Ok(tenant)
    }

    pub async fn is_known_tenant(&self, slug: &str) -> Result<bool, StoreError> {
        Ok(self.shared.find_tenant(slug).await?.is_some())
    }

    /// Brings the shared store and every registered tenant store up to the
    /// current schema. One tenant failing does not stop the others.
    pub async fn migrate_all_tenants(&self) -> Result<Vec<MigrationOutcome>, StoreError> {
        self.shared.migrate().await?;
        info!("Migrated shared store");

        let mut outcomes = Vec::new();
        for tenant in self.shared.list_tenants().await? {
            let result = match self.get_or_provision(&tenant.slug).await {
                Ok(store) => store.apply_schema().await,
                Err(e) => Err(e),
            };
            match &result {
                Ok(()) => info!("Migrated tenant {}", tenant.slug),
                Err(e) => error!("Failed to migrate tenant {}: {}", tenant.slug, e),
            }
            outcomes.push(MigrationOutcome {
                slug: tenant.slug,
                result,
            });
        }

        Ok(outcomes)
    }

    #[cfg(test)]
    pub fn provision_runs(&self) -> usize {
        self.provision_runs.load(Ordering::SeqCst)
    }
}
