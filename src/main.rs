use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use recruitdesk::auth::{MemoryTokenStore, SqliteTokenStore, TokenStore, TOKEN_KEY};
use recruitdesk::config::Config;
use recruitdesk::executor::Params;
use recruitdesk::store::ViewStore;
use recruitdesk::{Client, ClientBuilder};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "recruitdesk")]
#[command(about = "Command-line access to the recruiting dashboard API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/recruitdesk/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the credential in memory only
  #[arg(long)]
  ephemeral: bool,

  /// Also write logs to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Store a bearer token for later calls
  Login { token: String },
  /// Forget the stored token
  Logout,
  /// Fetch one entity, e.g. `get jobs 7`
  Get { resource: String, id: String },
  /// Fetch a collection, e.g. `list jobs -p status=open`
  List {
    resource: String,
    #[arg(short = 'p', long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
  },
  /// Create an entity from a JSON body
  Create { resource: String, body: String },
  /// Partially update an entity with a JSON body
  Update { resource: String, id: String, body: String },
  /// Delete an entity by id
  Delete { resource: String, id: String },
  /// Follow live updates, printing the view after each change
  Watch { collection: Option<String> },
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
  raw
    .split_once('=')
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

fn parse_body(raw: &str) -> Result<Value> {
  serde_json::from_str(raw).map_err(|e| eyre!("Body is not valid JSON: {}", e))
}

fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("recruitdesk");
  std::fs::create_dir_all(&log_dir).map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, "recruitdesk.log"));
  let filter = EnvFilter::try_from_env("RECRUITDESK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
    .with(verbose.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
    .init();

  Ok(guard)
}

fn token_store(args: &Args) -> Result<Arc<dyn TokenStore>> {
  if args.ephemeral {
    return Ok(Arc::new(MemoryTokenStore::new()));
  }
  Ok(Arc::new(SqliteTokenStore::open()?))
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn print_view(view: &ViewStore, collection: Option<&str>) -> Result<()> {
  match collection {
    Some(name) => print_json(&Value::Array(view.collection(name).to_vec())),
    None => {
      for name in view.collection_names() {
        println!("{}: {} entities", name, view.collection(name).len());
      }
      Ok(())
    }
  }
}

async fn watch(client: &Client, config: &Config, collection: Option<String>) -> Result<()> {
  let url = config
    .live
    .url
    .as_deref()
    .ok_or_else(|| eyre!("No live channel configured. Set `live.url` in the config file."))?;

  if let Some(name) = &collection {
    client.list(name, Params::new()).await?;
    print_view(&client.snapshot(), Some(name))?;
  }

  let mut live = client.connect_live(url).await?;
  let mut updates = client.subscribe();

  loop {
    tokio::select! {
      changed = updates.changed() => {
        if changed.is_err() {
          break;
        }
        let view = updates.borrow_and_update().clone();
        print_view(&view, collection.as_deref())?;
      }
      _ = live.closed() => break,
      _ = tokio::signal::ctrl_c() => break,
    }
  }

  if !live.is_alive() {
    eprintln!("Live channel closed after {} events", live.events_applied());
  }
  live.close().await;
  Ok(())
}

async fn run(args: Args, config: Config) -> Result<()> {
  let durable = token_store(&args)?;

  match &args.command {
    Command::Login { token } => {
      durable.save(TOKEN_KEY, token)?;
      println!("Logged in");
      return Ok(());
    }
    Command::Logout => {
      durable.remove(TOKEN_KEY)?;
      println!("Logged out");
      return Ok(());
    }
    _ => {}
  }

  // An environment token wins over the stored one and is never persisted
  let tokens: Arc<dyn TokenStore> = match Config::env_token() {
    Some(token) => {
      let store = MemoryTokenStore::new();
      store.save(TOKEN_KEY, &token)?;
      Arc::new(store)
    }
    None => durable,
  };

  let client = ClientBuilder::from_config(&config).token_store(tokens).build()?;
  let mut redirects = client.login_redirects();

  let result = execute(&client, &config, args.command).await;

  if let Ok(redirect) = redirects.try_recv() {
    eprintln!(
      "Session expired on {}. Sign in again at {} and run `recruitdesk login <token>`.",
      redirect.endpoint, redirect.path
    );
  }
  result
}

async fn execute(client: &Client, config: &Config, command: Command) -> Result<()> {
  match command {
    Command::Get { resource, id } => print_json(&client.get(&resource, id.as_str()).await?),
    Command::List { resource, params } => {
      let params: Params = params.into_iter().collect();
      print_json(&client.list(&resource, params).await?)
    }
    Command::Create { resource, body } => print_json(&client.create(&resource, parse_body(&body)?).await?),
    Command::Update { resource, id, body } => print_json(&client.update(&resource, id, parse_body(&body)?).await?),
    Command::Delete { resource, id } => {
      client.delete(&resource, id).await?;
      println!("Deleted");
      Ok(())
    }
    Command::Watch { collection } => watch(client, config, collection).await,
    // Handled before a client exists
    Command::Login { .. } | Command::Logout => Ok(()),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;
  info!(base_url = %config.api.base_url, "Starting");

  run(args, config).await
}
