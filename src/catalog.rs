use crate::embeddings::EmbeddingService;
use crate::store::{NewProduct, Product, StoreError, TenantStore};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct BackfillReport {
    pub embedded: usize,
    /// Product name and the reason it was skipped.
    pub failed: Vec<(String, String)>,
}

const BACKFILL_BATCH: usize = 32;

/// Embeds every product that lacks a vector, or every product when
/// `force` is set. A batch that fails is retried one product at a time so
/// only the failing products are reported and skipped.
pub async fn backfill_embeddings(
    store: &TenantStore,
    embedder: &dyn EmbeddingService,
    force: bool,
    delay: Duration,
) -> Result<BackfillReport, StoreError> {
    let products = if force {
        store.products().await?
    } else {
        store.products_missing_embedding().await?
    };
    info!(
        "Embedding {} products for tenant {}{}",
        products.len(),
        store.slug(),
        if force { " (forced)" } else { "" }
    );

    let mut report = BackfillReport::default();
    for (i, chunk) in products.chunks(BACKFILL_BATCH).enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let texts: Vec<String> = chunk.iter().map(Product::embedding_text).collect();
        let vectors: Vec<anyhow::Result<Vec<f32>>> = match embedder.embed_passages(&texts).await {
            Ok(vectors) if vectors.len() == chunk.len() => vectors.into_iter().map(Ok).collect(),
            Ok(vectors) => {
                warn!(
                    "Batch returned {} vectors for {} products, retrying one by one",
                    vectors.len(),
                    chunk.len()
                );
                embed_each(embedder, &texts).await
            }
            Err(e) => {
                warn!("Batch embedding failed, retrying one by one: {:#}", e);
                embed_each(embedder, &texts).await
            }
        };

        for (product, vector) in chunk.iter().zip(vectors) {
            let reason = match vector {
                Ok(v) if v.len() == embedder.dimensions() => {
                    store.set_product_embedding(product.id, &v).await?;
                    report.embedded += 1;
                    continue;
                }
                Ok(v) => format!("expected {} dimensions, got {}", embedder.dimensions(), v.len()),
                Err(e) => format!("{:#}", e),
            };
            warn!("Skipping {}: {}", product.name, reason);
            report.failed.push((product.name.clone(), reason));
        }
    }

    Ok(report)
}

async fn embed_each(embedder: &dyn EmbeddingService, texts: &[String]) -> Vec<anyhow::Result<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for text in texts {
        vectors.push(embedder.embed_passage(text).await);
    }
    vectors
}

fn exported(product: Product, with_embeddings: bool) -> NewProduct {
    NewProduct {
        created_at: chrono::DateTime::from_timestamp_micros(product.created_at_us)
            .map(|dt| dt.to_rfc3339()),
        embedding: if with_embeddings { product.embedding } else { None },
        name: product.name,
        price: product.price,
        attributes: product.attributes,
        image: product.image,
    }
}

pub async fn export_products(
    store: &TenantStore,
    with_embeddings: bool,
) -> Result<Vec<NewProduct>, StoreError> {
    Ok(store
        .products()
        .await?
        .into_iter()
        .map(|p| exported(p, with_embeddings))
        .collect())
}

pub async fn import_products(
    store: &TenantStore,
    products: Vec<NewProduct>,
) -> Result<usize, StoreError> {
    let mut count = 0;
    for product in products {
        store.insert_product(product).await?;
        count += 1;
    }
    info!("Imported {} products into tenant {}", count, store.slug());
    Ok(count)
}
