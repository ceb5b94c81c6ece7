use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use serde_json::{json, Value};
use tracing::debug;

use appdb_docs::{ChangeBus, Decorated, Document, DocumentKey, DocumentStore, ItemKey, KeyRange, Partition};
use appdb_schema::{CachingRegistry, DirManifests};
use appdb_server::{AppdbServer, ServerConfig};
use appdb_store::SqliteBackend;
use appdb_types::{fields_from_value, Fields};

use crate::cli::*;

/// The result of one admin command, before rendering.
#[derive(Debug)]
pub enum Output {
    Item(Decorated),
    Items(Vec<Decorated>),
    Stored(Document),
    Added(ItemKey),
    Deleted(DocumentKey),
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let output = match cli.command {
        Command::Serve(args) => return cmd_serve(args).await,
        command => execute(command).await?,
    };
    println!("{}", render(&output, cli.format));
    Ok(())
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = match args.config {
        Some(ref path) => ServerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if config.api_keys.is_empty() {
        eprintln!("{} no api keys configured; every app-data request will be rejected", "warning:".yellow().bold());
    }
    AppdbServer::new(config)?.serve().await?;
    Ok(())
}

/// Run an admin command against the local database.
pub async fn execute(command: Command) -> anyhow::Result<Output> {
    match command {
        Command::Serve(_) => anyhow::bail!("serve is not an admin command"),
        Command::Get(args) => {
            let (store, partition) = open(&args.target)?;
            let key = partition.key(parse_key(&args.key)?);
            if args.strict {
                let document = store.get_complete(&key).await?;
                return Ok(Output::Item(Decorated {
                    document,
                    failures: Vec::new(),
                }));
            }
            Ok(Output::Item(store.get(&key).await?))
        }
        Command::List(args) => {
            let (store, partition) = open(&args.target)?;
            let range = KeyRange::from_bounds(&args.start, &args.end);
            Ok(Output::Items(store.list(&partition, &range).await?))
        }
        Command::Set(args) => {
            let (store, partition) = open(&args.target)?;
            let key = partition.key(parse_key(&args.key)?);
            Ok(Output::Stored(store.set(&key, parse_value(&args.value)?).await?))
        }
        Command::Add(args) => {
            let (store, partition) = open(&args.target)?;
            Ok(Output::Added(store.add(&partition, parse_value(&args.value)?).await?))
        }
        Command::Update(args) => {
            let (store, partition) = open(&args.target)?;
            let key = partition.key(parse_key(&args.key)?);
            Ok(Output::Stored(store.update(&key, parse_value(&args.value)?).await?))
        }
        Command::Delete(args) => {
            let (store, partition) = open(&args.target)?;
            let key = partition.key(parse_key(&args.key)?);
            store.delete(&key).await?;
            Ok(Output::Deleted(key))
        }
    }
}

fn open(target: &Target) -> anyhow::Result<(DocumentStore, Partition)> {
    let partition = Partition::parse(&target.wallet, &target.app, &target.model)?;
    let backend = SqliteBackend::open(&target.db)
        .with_context(|| format!("opening database {}", target.db.display()))?;
    let registry = CachingRegistry::new(DirManifests::new(target.manifests.clone()));
    debug!(db = %target.db.display(), manifests = %target.manifests.display(), "store opened");

    let store = DocumentStore::new(Arc::new(backend), Arc::new(registry), ChangeBus::default());
    Ok((store, partition))
}

fn parse_key(raw: &str) -> anyhow::Result<ItemKey> {
    Ok(raw.parse()?)
}

fn parse_value(raw: &str) -> anyhow::Result<Fields> {
    let value: Value = serde_json::from_str(raw).context("value is not valid JSON")?;
    Ok(fields_from_value(value)?)
}

pub fn render(output: &Output, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => render_json(output).to_string(),
        OutputFormat::Text => render_text(output),
    }
}

fn render_json(output: &Output) -> Value {
    match output {
        Output::Item(item) => decorated_json(item),
        Output::Items(items) => Value::Array(items.iter().map(decorated_json).collect()),
        Output::Stored(doc) => json!(doc),
        Output::Added(key) => json!({ "key": key }),
        Output::Deleted(key) => json!({ "deleted": key }),
    }
}

fn decorated_json(item: &Decorated) -> Value {
    let mut value = json!(item.document);
    if !item.failures.is_empty() {
        value["computeErrors"] = json!(item.failures);
    }
    value
}

fn render_text(output: &Output) -> String {
    match output {
        Output::Item(item) => item_line(item),
        Output::Items(items) if items.is_empty() => "No documents.".dimmed().to_string(),
        Output::Items(items) => items.iter().map(item_line).collect::<Vec<_>>().join("\n"),
        Output::Stored(doc) => format!(
            "{} Stored {}  {}",
            "✓".green().bold(),
            doc.key.key.as_str().yellow(),
            Value::Object(doc.value.clone())
        ),
        Output::Added(key) => format!("{} Added {}", "✓".green().bold(), key.as_str().yellow()),
        Output::Deleted(key) => format!("{} Deleted {}", "✓".green().bold(), key.key.as_str().yellow()),
    }
}

fn item_line(item: &Decorated) -> String {
    let doc = &item.document;
    let mut line = format!(
        "{}  {}  {}",
        doc.key.key.as_str().yellow().bold(),
        doc.updated_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
        Value::Object(doc.value.clone())
    );
    for failure in &item.failures {
        line.push_str(&format!("\n  {} {failure}", "!".red().bold()));
    }
    line
}
