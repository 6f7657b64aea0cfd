use mnemo::assistant::{Assistant, AssistantSettings};
use mnemo::cli::{category_filter, Cli, Commands, ConfigAction, FragmentsAction};
use mnemo::config::Config;
use mnemo::embedding::{l2_norm, EmbeddingProvider, OnnxEmbedder};
use mnemo::error::{MnemoError, Result};
use mnemo::retrieval::{FragmentEmbeddings, RankedResult, RankerSettings, RetrievalRanker};
use mnemo::storage::FragmentStore;
use mnemo::worker::WorkerPool;
use std::path::PathBuf;
use std::sync::Arc;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Ask {
            question,
            top_k,
            categories,
            sources,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_ask(&config, question, top_k, category_filter(categories), sources)?;
        }
        Commands::Search {
            query,
            top_k,
            min_score,
            categories,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_search(&config, query, top_k, min_score, category_filter(categories), json)?;
        }
        Commands::Embed { text, json } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_embed(&config, &text, json)?;
        }
        Commands::Fragments { action } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_fragments(&config, action)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "mnemo=debug" } else { "mnemo=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &Config) -> Result<FragmentStore> {
    FragmentStore::open(&config.storage.database_path()?)
}

fn load_embedder(config: &Config) -> Result<Arc<OnnxEmbedder>> {
    let embedder = OnnxEmbedder::new(config.embedding.to_options()?)?;
    tracing::info!("Loaded embedding model {}", embedder.model_name());
    Ok(Arc::new(embedder))
}

fn cmd_ask(
    config: &Config,
    question: String,
    top_k: Option<usize>,
    categories: Option<Vec<String>>,
    show_sources: bool,
) -> Result<()> {
    let store = open_store(config)?;
    let embedder = load_embedder(config)?;
    let ranker = RetrievalRanker::new(embedder, RankerSettings::from_config(&config.retrieval));
    let spec = config.worker.to_spec()?;

    let runtime = tokio::runtime::Runtime::new().map_err(|e| MnemoError::Io {
        source: e,
        context: "Failed to start async runtime".to_string(),
    })?;

    runtime.block_on(async {
        let pool = WorkerPool::initialize(config.pool.max_instances, spec).await?;
        let assistant = Assistant::new(store, ranker, pool.clone(), AssistantSettings::from_config(config));

        let mut query = assistant.query(&question);
        if let Some(k) = top_k {
            query = query.with_top_k(k);
        }
        if let Some(categories) = categories {
            query = query.with_categories(categories);
        }

        let interrupted = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        // dropping the request kills the worker's whole process group
        let result = tokio::select! {
            answer = assistant.ask_with(query, std::future::pending::<()>()) => answer,
            _ = interrupted => Err(MnemoError::Cancelled),
        };
        pool.dispose();

        let answer = result?;
        println!("{}", answer.text);

        if show_sources {
            println!();
            println!("Sources:");
            print_results(&answer.sources);
        }
        tracing::debug!(
            "Generation finished in {:?} ({})",
            answer.generation.elapsed,
            answer.generation.state
        );
        Ok::<(), MnemoError>(())
    })
}

fn cmd_search(
    config: &Config,
    text: String,
    top_k: Option<usize>,
    min_score: Option<f32>,
    categories: Option<Vec<String>>,
    json: bool,
) -> Result<()> {
    let store = open_store(config)?;
    let embedder = load_embedder(config)?;
    let ranker = RetrievalRanker::new(embedder, RankerSettings::from_config(&config.retrieval));

    let mut query = mnemo::retrieval::RetrievalQuery::from_config(text, &config.retrieval);
    if let Some(k) = top_k {
        query = query.with_top_k(k);
    }
    if let Some(score) = min_score {
        query = query.with_min_score(score);
    }
    if let Some(categories) = categories {
        query = query.with_categories(categories);
    }

    let results = ranker.search(&store, &query)?;

    if json {
        print_json(&results)?;
    } else if results.is_empty() {
        println!("No fragments scored above {:.2}", query.min_relevance_score);
    } else {
        print_results(&results);
    }
    Ok(())
}

fn cmd_embed(config: &Config, text: &str, json: bool) -> Result<()> {
    let embedder = load_embedder(config)?;
    let vector = embedder.embed(text)?;

    if json {
        return print_json(&vector);
    }

    println!("Model: {}", embedder.model_name());
    println!("Dimension: {}", vector.len());
    println!("Norm: {:.4}", l2_norm(&vector));
    let preview: Vec<String> = vector.iter().take(8).map(|v| format!("{:.4}", v)).collect();
    println!("Values: [{}, ...]", preview.join(", "));
    Ok(())
}

fn cmd_fragments(config: &Config, action: FragmentsAction) -> Result<()> {
    let store = open_store(config)?;

    match action {
        FragmentsAction::List { categories, json } => {
            let fragments = store.list(category_filter(categories).as_deref())?;
            if json {
                return print_json(&fragments);
            }
            for fragment in &fragments {
                let marker = if fragment.is_searchable() { ' ' } else { '!' };
                println!(
                    "{}{:>5}  [{}] {}",
                    marker,
                    fragment.id,
                    fragment.category,
                    preview(&fragment.content, 80)
                );
            }
            println!("{} fragments", fragments.len());
        }
        FragmentsAction::Count => {
            let stats = store.stats()?;
            println!("Fragments:  {}", stats.fragment_count);
            println!("Searchable: {}", stats.searchable_count);
            for (category, count) in store.categories()? {
                println!("  {:<24} {}", category, count);
            }
        }
        FragmentsAction::Add { category, content } => {
            let embedder = load_embedder(config)?;
            let embeddings = FragmentEmbeddings::compute(embedder.as_ref(), &category, &content)?;
            let id = store.insert(&category, &content, &embeddings)?;
            println!("✓ Stored fragment {}", id);
        }
        FragmentsAction::Delete { id } => {
            store.delete(id)?;
            println!("✓ Deleted fragment {}", id);
        }
    }
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let mut value = serde_json::to_value(&config).map_err(|e| MnemoError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            if let Some(section) = section {
                value = value.get(&section).cloned().ok_or_else(|| {
                    MnemoError::Config(format!("Unknown config section: {}", section))
                })?;
            }
            print_json(&value)?;
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = match profile {
                Some(profile) => Config::load_with_profile(&path, &profile)?,
                None => Config::load(&path)?,
            };
            config.worker.to_spec()?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            // Create parent directory
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| MnemoError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
            println!("  Set worker.model_path and the embedding model paths before running `mnemo ask`");
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'mnemo config init' to create one."
        );
        let mut config = Config::default();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        config.apply_env_overrides();
        mnemo::config::ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}

fn print_results(results: &[RankedResult]) {
    for result in results {
        println!(
            "{:.3}  #{} [{}] {}",
            result.score,
            result.fragment.id,
            result.fragment.category,
            preview(&result.fragment.content, 100)
        );
        if !result.matched_keywords.is_empty() {
            println!("       keywords: {}", result.matched_keywords.join(", "));
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| MnemoError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let single_line = text.replace('\n', " ");
    match single_line.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &single_line[..cut]),
        None => single_line,
    }
}
