use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use open_resolver::{Config, InvidiousResolver, JsonFileStore, MemoryStore, ResolutionEngine};
use open_resolver::store::DurableStore;

fn print_usage() {
    eprintln!(
        "Uso: open-resolver <comando> [args]\n\n\
         Comandos:\n  \
         resolve <id>              registro completo (metadata + stream)\n  \
         batch <id> [id...]        lote de registros, fallos por id incluidos\n  \
         related <id>              relacionados ligeros (camino rápido)\n  \
         related-full <id>         relacionados con streams (camino lento)\n  \
         search <query> [límite]   búsqueda cacheada"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_resolver=debug".parse()?)
                .add_directive("reqwest=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Resolver v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    // Tier durable: archivos JSON si hay DATA_DIR, memoria en caso contrario
    let durable: Arc<dyn DurableStore> = match &config.data_dir {
        Some(dir) => {
            info!("💾 Store durable en {}", dir.display());
            Arc::new(JsonFileStore::new(dir.clone()).await?)
        }
        None => {
            info!("💾 Store durable en memoria (no sobrevive reinicios)");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = ResolutionEngine::new(
        Arc::new(InvidiousResolver::new()),
        Some(durable),
        config,
    );
    let sweeper = engine.start_sweeper();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let outcome = run_command(&engine, &args).await;

    // Teardown ordenado: primero la admisión, después el sweeper
    engine.shutdown();
    sweeper.shutdown().await;

    outcome
}

async fn run_command(engine: &ResolutionEngine, args: &[String]) -> Result<()> {
    let Some(command) = args.first() else {
        print_usage();
        anyhow::bail!("falta el comando");
    };

    match command.as_str() {
        "resolve" => {
            let id = args.get(1).ok_or_else(|| anyhow::anyhow!("falta el id"))?;
            let record = engine.resolve_item(id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        "batch" => {
            let ids = &args[1..];
            if ids.is_empty() {
                anyhow::bail!("falta al menos un id");
            }
            let entries = engine.resolve_batch(ids).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        "related" => {
            let id = args.get(1).ok_or_else(|| anyhow::anyhow!("falta el id"))?;
            let records = engine.resolve_related(id).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        "related-full" => {
            let id = args.get(1).ok_or_else(|| anyhow::anyhow!("falta el id"))?;
            let records = engine.resolve_related_with_streams(id).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        "search" => {
            let query = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("falta la query"))?;
            let limit = match args.get(2) {
                Some(raw) => raw.parse()?,
                None => 10,
            };
            let records = engine.search(query, limit).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        other => {
            print_usage();
            anyhow::bail!("comando desconocido: {}", other);
        }
    }

    Ok(())
}
