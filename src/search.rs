use crate::pipeline::Attributes;
use crate::store::{EntityKind, Product, StoreError};
use crate::tenant::{TenantContext, TenantStorageRouter};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ProductSummary {
    pub name: String,
    pub price: f64,
    pub image: Option<String>,
    pub attributes: Attributes,
    pub score: f32,
}

#[derive(Clone)]
pub struct SemanticSearch {
    router: Arc<TenantStorageRouter>,
}

impl SemanticSearch {
    pub fn new(router: Arc<TenantStorageRouter>) -> Self {
        Self { router }
    }

    pub async fn search(
        &self,
        query: &[f32],
        ctx: &TenantContext,
        top_k: usize,
    ) -> Result<Vec<ProductSummary>, StoreError> {
        let store = self.router.tenant_store(EntityKind::Product, ctx).await?;
        let products = store.embedded_products().await?;
        let ranked = rank(query, products, top_k);
        debug!("Search in {} returned {} products", store.slug(), ranked.len());
        Ok(ranked)
    }
}

fn rank(query: &[f32], products: Vec<Product>, top_k: usize) -> Vec<ProductSummary> {
    let mut scored: Vec<ProductSummary> = products
        .into_iter()
        .filter_map(|p| {
            let embedding = p.embedding.as_deref()?;
            if embedding.len() != query.len() {
                return None;
            }
            let score = cosine_similarity(query, embedding);
            Some(ProductSummary {
                name: p.name,
                price: p.price,
                image: p.image,
                attributes: p.attributes,
                score,
            })
        })
        .collect();

    // sort_by is stable: equal scores keep catalog order.
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(top_k);
    scored
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
