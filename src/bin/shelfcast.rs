//! shelfcast CLI: 图书推荐命令行工具
//!
//! Usage:
//!   shelfcast recommend <book> [--tag <tag>]... [--once]   Stream (or fetch) recommendations
//!   shelfcast tags <book>                                 Resolve tags for a book or author
//!   shelfcast stats                                       Show cache statistics
//!   shelfcast clear-cache                                 Clear both cache tiers

use anyhow::{bail, Context};
use futures::StreamExt;
use shelfcast::provider::OpenAiProvider;
use shelfcast::{
    OutboundEvent, Query, RecommendationService, ShelfcastConfig, StreamingRelay, TieredCache,
};
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "recommend" => cmd_recommend(&args[2..]).await,
        "tags" => cmd_tags(&args[2..]).await,
        "stats" => cmd_stats(&args[2..]).await,
        "clear-cache" => cmd_clear(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("shelfcast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"shelfcast - cached, streamed book recommendations

USAGE:
    shelfcast <COMMAND> [OPTIONS]

COMMANDS:
    recommend <book> [--tag <tag>]... [--once]   Recommend books similar to <book>
    tags <book>                                  Resolve tags for a book or author
    stats                                        Show cache statistics
    clear-cache                                  Clear the networked and local cache
    version                                      Show version information
    help                                         Show this help message

OPTIONS:
    --config <file>     Read configuration from a YAML file instead of the environment
    --once              Single-shot answer instead of a stream

ENVIRONMENT:
    OPENAI_API_KEY      Provider API key (required for recommend and tags)
    OPENAI_MODEL        Model name (default gpt-4o-mini)
    REDIS_URL           Networked cache; CACHE_BACKEND=local disables it
    RUST_LOG            Log filter (default info), logs go to stderr"#
    );
}

/// Value following `flag`, if present.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn load_config(args: &[String]) -> anyhow::Result<ShelfcastConfig> {
    let config = match flag_value(args, "--config") {
        Some(path) => ShelfcastConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path))?,
        None => ShelfcastConfig::from_env().context("reading environment")?,
    };
    Ok(config)
}

/// Positional arguments, with flags and their values removed.
fn positionals(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--tag" | "--config" => {
                iter.next();
            }
            "--once" => {}
            other => out.push(other),
        }
    }
    out
}

async fn cmd_recommend(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let name = positionals(args).join(" ");
    let tags: Vec<&str> = args
        .iter()
        .enumerate()
        .filter(|(_, a)| a.as_str() == "--tag")
        .filter_map(|(i, _)| args.get(i + 1).map(String::as_str))
        .collect();
    let query = Query::new(name, tags)?;

    let provider = Arc::new(OpenAiProvider::new(&config.provider)?);
    let cache = Arc::new(TieredCache::connect(config.cache.clone()).await);

    if args.iter().any(|a| a == "--once") {
        let service = RecommendationService::new(provider, cache);
        match service.recommend(&query).await {
            Ok(rec) => {
                if rec.from_cache {
                    eprintln!("(cached)");
                }
                println!("{}", rec.text);
                return Ok(());
            }
            Err(e) => bail!("{} [{}]", e.message, e.code()),
        }
    }

    let relay = StreamingRelay::builder(provider, cache)
        .config(config.relay.clone())
        .build();
    let (mut events, _cancel) = relay.stream(query);
    let mut stdout = std::io::stdout();
    let mut streamed = false;
    while let Some(event) = events.next().await {
        match event {
            OutboundEvent::Tags(tags) => eprintln!("tags: {}", tags.join(", ")),
            OutboundEvent::Chunk { fragment, .. } => {
                streamed = true;
                write!(stdout, "{}", fragment)?;
                stdout.flush()?;
            }
            OutboundEvent::Done { text } => {
                // A cached answer arrives whole, without chunks.
                if !streamed {
                    eprintln!("(cached)");
                    print!("{}", text);
                }
                println!();
            }
            OutboundEvent::Error { message, kind } => bail!("{} [{}]", message, kind.code()),
        }
    }
    Ok(())
}

async fn cmd_tags(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let name = positionals(args).join(" ");
    if name.trim().is_empty() {
        bail!("usage: shelfcast tags <book>");
    }
    let provider = Arc::new(OpenAiProvider::new(&config.provider)?);
    let cache = Arc::new(TieredCache::local_only(config.cache.clone()));
    let service = RecommendationService::new(provider, cache);
    let tags = service.tags(&name).await;
    println!("{}", serde_json::to_string(&serde_json::json!({ "tags": tags }))?);
    Ok(())
}

async fn cmd_stats(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let cache = TieredCache::connect(config.cache.clone()).await;
    let stats = cache.stats().await;
    println!("networked available: {}", stats.networked_available);
    match stats.networked_size {
        Some(n) => println!("networked entries:   {}", n),
        None => println!("networked entries:   -"),
    }
    println!("local entries:       {}", stats.local_size);
    Ok(())
}

async fn cmd_clear(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let cache = TieredCache::connect(config.cache.clone()).await;
    cache.clear().await;
    println!("cache cleared");
    Ok(())
}
