mod context;
mod router;

pub use context::{InvalidSlug, TenantContext, TenantSlug};
pub use router::{MigrationOutcome, StoreHandle, TenantStorageRouter};
