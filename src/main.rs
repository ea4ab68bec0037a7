use std::io::Read;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use viability_memory::cli::{Cli, Commands, ConfigAction, IngestOpts, SearchOpts, UpdateOpts};
use viability_memory::config::{validate_config_object, Config};
use viability_memory::logging;
use viability_memory::memory::{
    filter_relevant, render_context, MemoryService, NewViability, ViabilityStore,
    ViabilityUpdate,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    logging::init(&config.logging);
    match &config.source {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => info!("No config file found, using defaults"),
    }

    match cli.command {
        Commands::Init => {
            let store = ViabilityStore::open(&config.db_path())?;
            println!("{}", store.path().display());
        }
        Commands::Ingest(opts) => ingest(&config, opts).await?,
        Commands::Search(opts) => search(&config, opts).await?,
        Commands::Show { id } => {
            let store = ViabilityStore::open(&config.db_path())?;
            let viability = store.get_viability(id)?;
            println!("{}", serde_json::to_string_pretty(&viability)?);
        }
        Commands::List => {
            let store = ViabilityStore::open(&config.db_path())?;
            for v in store.list_viabilities()? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    v.id, v.upload_date, v.viability_type, v.client_name, v.title
                );
            }
        }
        Commands::Update(opts) => update(&config, opts)?,
        Commands::Delete { id } => {
            let store = ViabilityStore::open(&config.db_path())?;
            store.delete_viability(id)?;
            info!(viability_id = id, "Viability deleted");
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Validate => {
                validate_config_object(&config)?;
                info!("Configuration is valid");
            }
            ConfigAction::Init => {
                let path = cli.config.as_deref().unwrap_or("viability.json");
                Config::write_default(path)?;
                info!("Configuration file created at {path}");
            }
        },
        Commands::Version => {
            println!("viability-memory {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn ingest(config: &Config, opts: IngestOpts) -> anyhow::Result<()> {
    validate_config_object(config)?;

    let source = opts.text_file.as_deref().unwrap_or(&opts.file);
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read text from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("failed to read text from '{source}'"))?
    };

    let service = MemoryService::open(config)?;
    let new = NewViability {
        title: opts.title,
        client_name: opts.client,
        viability_type: opts.viability_type,
        file_path: opts.file,
    };

    let id = service
        .ingest(&new, &text)
        .await
        .context("ingestion failed; nothing was stored")?;
    println!("{id}");
    Ok(())
}

async fn search(config: &Config, opts: SearchOpts) -> anyhow::Result<()> {
    validate_config_object(config)?;

    let service = MemoryService::open(config)?;
    let k = opts.k.unwrap_or(config.memory.top_k);
    let results = service.find_similar(&opts.query, k).await?;

    if opts.raw {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    let threshold = opts.threshold.unwrap_or(config.memory.relevance_threshold);
    let relevant = filter_relevant(&results, threshold);
    info!(found = results.len(), relevant = relevant.len(), "search finished");
    println!("{}", render_context(&relevant, k));
    Ok(())
}

fn update(config: &Config, opts: UpdateOpts) -> anyhow::Result<()> {
    let store = ViabilityStore::open(&config.db_path())?;
    let update = ViabilityUpdate {
        processed: opts.processed,
        summary: opts.summary,
        llm_feedback: opts.feedback,
        overall_score: opts.score,
    };
    store.update_viability(opts.id, &update)?;
    info!(viability_id = opts.id, "Viability updated");
    Ok(())
}
