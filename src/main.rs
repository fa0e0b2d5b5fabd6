mod catalog;
mod cli;
mod config;
mod embeddings;
mod entity;
mod llm;
mod pipeline;
mod search;
mod server;
mod session;
mod store;
mod tenant;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use store::{BotConfig, EntityKind, NewProduct, TenantStore};
use tenant::{TenantContext, TenantSlug, TenantStorageRouter};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Commands::Graph = cli.command {
        print!("{}", pipeline::mermaid());
        return Ok(());
    }

    let config = Config::from_file(&cli.config)?;
    let router = TenantStorageRouter::open(&config.data_dir)
        .await
        .context("Failed to open data directory")?;

    match cli.command {
        Commands::Serve => serve(config, router).await,
        Commands::Migrate => migrate(&router).await,
        Commands::CreateTenant { slug, name } => {
            let slug = TenantSlug::parse(&slug)?;
            let name = name.unwrap_or_else(|| slug.to_string());
            let tenant = router.register_tenant(&slug, &name).await?;
            info!("Tenant {} ({}) ready", tenant.slug, tenant.name);
            Ok(())
        }
        Commands::ConfigureBot { slug, input } => {
            let store = tenant_store(&router, &slug, EntityKind::BotConfiguration).await?;
            let bot: BotConfig = read_json(&input).await?;
            store.replace_bot_config(&bot).await?;
            Ok(())
        }
        Commands::EmbedProducts {
            slug,
            force,
            delay_ms,
        } => {
            let store = tenant_store(&router, &slug, EntityKind::Product).await?;
            let embedder = embeddings::create_embedding_service(&config)?;
            let report = catalog::backfill_embeddings(
                &store,
                embedder.as_ref(),
                force,
                Duration::from_millis(delay_ms),
            )
            .await?;
            info!(
                "Embedded {} products, {} failed",
                report.embedded,
                report.failed.len()
            );
            for (name, reason) in &report.failed {
                error!("{}: {}", name, reason);
            }
            Ok(())
        }
        Commands::ExportProducts {
            slug,
            output,
            with_embeddings,
        } => {
            let store = tenant_store(&router, &slug, EntityKind::Product).await?;
            let products = catalog::export_products(&store, with_embeddings).await?;
            let json = serde_json::to_string_pretty(&products)?;
            tokio::fs::write(&output, json)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!("Exported {} products to {}", products.len(), output.display());
            Ok(())
        }
        Commands::ImportProducts { slug, input } => {
            let store = tenant_store(&router, &slug, EntityKind::Product).await?;
            let products: Vec<NewProduct> = read_json(&input).await?;
            catalog::import_products(&store, products).await?;
            Ok(())
        }
        Commands::Graph => Ok(()),
    }
}

async fn serve(config: Config, router: Arc<TenantStorageRouter>) -> Result<()> {
    let models = llm::ModelSet::from_config(&config)?;
    let embedder = embeddings::create_embedding_service(&config)?;
    let pipeline = pipeline::Pipeline::new(
        models,
        embedder,
        search::SemanticSearch::new(router.clone()),
        config.pipeline,
    );
    let state = server::AppState {
        router: router.clone(),
        session: session::StreamingSession::new(router, Arc::new(pipeline)),
    };

    server::serve(state, config.bind).await?;
    info!("Shutdown complete");
    Ok(())
}

async fn migrate(router: &TenantStorageRouter) -> Result<()> {
    let outcomes = router.migrate_all_tenants().await?;
    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => info!("{}: ok", outcome.slug),
            Err(e) => {
                failed += 1;
                error!("{}: {}", outcome.slug, e);
            }
        }
    }
    info!("Migrated {} tenants, {} failed", outcomes.len() - failed, failed);
    if failed > 0 {
        bail!("{} tenant migrations failed", failed);
    }
    Ok(())
}

async fn tenant_store(
    router: &TenantStorageRouter,
    slug: &str,
    kind: EntityKind,
) -> Result<Arc<TenantStore>> {
    let slug = TenantSlug::parse(slug)?;
    if !router.is_known_tenant(slug.as_str()).await? {
        return Err(store::StoreError::UnknownTenant(slug.to_string()).into());
    }
    Ok(router
        .tenant_store(kind, &TenantContext::for_tenant(slug))
        .await?)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}
