use super::{StoreError, Tenant, blocking, now_us, sqlite_url};
use crate::entity::tenants;
use crate::tenant::TenantSlug;
use sea_orm::*;
use std::path::Path;
use tracing::info;

pub struct SharedStore {
    db_url: String,
}

impl SharedStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let store = Self {
            db_url: sqlite_url(path),
        };
        store.migrate().await?;
        info!("Shared store ready at {}", path.display());
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        blocking(&self.db_url, |db| {
            db.get_schema_builder()
                .register(tenants::Entity)
                .apply(db)?;
            Ok(())
        })
        .await
    }

    /// Inserts the tenant unless the slug is already registered, in which case
    /// the existing record is returned untouched.
    pub async fn register_tenant(&self, slug: &TenantSlug, name: &str) -> Result<Tenant, StoreError> {
        let slug = slug.clone();
        let name = name.to_string();
        blocking(&self.db_url, move |db| {
            if let Some(existing) = tenants::Entity::find()
                .filter(tenants::Column::Slug.eq(slug.as_str()))
                .one(db)?
            {
                return Tenant::try_from(existing);
            }

            let record = tenants::ActiveModel {
                rowid: NotSet,
                slug: Set(slug.to_string()),
                name: Set(name.clone()),
                created_at_us: Set(now_us()),
            };
            tenants::Entity::insert(record).exec(db)?;
            info!("Registered tenant: {}", slug);

            tenants::Entity::find()
                .filter(tenants::Column::Slug.eq(slug.as_str()))
                .one(db)?
                .ok_or_else(|| StoreError::NotFound(format!("Tenant {}", slug)))
                .and_then(Tenant::try_from)
        })
        .await
    }

    pub async fn find_tenant(&self, slug: &str) -> Result<Option<Tenant>, StoreError> {
        let slug = slug.to_string();
        blocking(&self.db_url, move |db| {
            tenants::Entity::find()
                .filter(tenants::Column::Slug.eq(slug))
                .one(db)?
                .map(Tenant::try_from)
                .transpose()
        })
        .await
    }

    pub async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        blocking(&self.db_url, |db| {
            tenants::Entity::find()
                .order_by_asc(tenants::Column::Rowid)
                .all(db)?
                .into_iter()
                .map(Tenant::try_from)
                .collect()
        })
        .await
    }
}
