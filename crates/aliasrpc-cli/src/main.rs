//! # aliasrpc CLI Entry Point
//!
//! Runs a shared registry, serves the demo handlers, and makes calls by alias.
//!
//! ## Usage
//!
//! ```bash
//! # Start the shared registry
//! aliasrpc registry -b 0.0.0.0:7379
//!
//! # Serve the demo handlers (math, echo)
//! aliasrpc serve --registry 127.0.0.1:7379
//!
//! # Only expose math.add
//! aliasrpc serve --registry 127.0.0.1:7379 --only add
//!
//! # Make a call (outputs raw JSON)
//! aliasrpc call math add '[2, 3]'
//!
//! # List the live servers of an alias
//! aliasrpc lookup math
//! ```
//!
//! Every command except `registry` finds the registry through `--registry`,
//! then the `ALIASRPC_REGISTRY` environment variable, then `127.0.0.1:7379`.

mod demo;

use std::sync::Arc;
use std::time::Duration;

use aliasrpc_client::{ClientConfig, RpcClient};
use aliasrpc_registry::{MemoryStore, RegistryClient, RegistryConfig, RegistryServer, RemoteStore};
use aliasrpc_server::{HandlerSpec, RpcServer, ServerConfig, ServerEvent, TransportConfig};
use anyhow::Result;
use argh::FromArgs;
use serde_json::Value;
use tokio::sync::watch;

/// Registry address used when neither the flag nor the environment names one
const DEFAULT_REGISTRY: &str = "127.0.0.1:7379";

/// Environment variable holding the registry address
const REGISTRY_ENV: &str = "ALIASRPC_REGISTRY";

#[derive(FromArgs)]
/// aliasrpc - call remote handlers by alias
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Registry(RegistryArgs),
    Serve(ServeArgs),
    Call(CallArgs),
    Lookup(LookupArgs),
}

/// Arguments for running the shared registry.
///
/// The registry keeps service records in memory; records expire when their
/// server stops renewing them.
#[derive(FromArgs)]
#[argh(subcommand, name = "registry")]
/// run the shared service registry
struct RegistryArgs {
    /// address to bind the registry to
    #[argh(option, short = 'b', default = "\"0.0.0.0:7379\".into()")]
    bind: String,
}

/// Arguments for serving the demo handlers.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// serve the demo handlers and publish them in the registry
struct ServeArgs {
    /// registry address
    #[argh(option, short = 'r')]
    registry: Option<String>,

    /// host advertised to clients; detected from the local network by default
    #[argh(option)]
    host: Option<String>,

    /// port to listen on; the first free port from 7007 by default
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// record time-to-live in seconds
    ///
    /// Records are renewed every half TTL.
    #[argh(option, default = "30")]
    ttl: u64,

    /// math methods to expose; repeat for several, all methods if omitted
    #[argh(option)]
    only: Vec<String>,
}

/// Arguments for making a single call.
///
/// Outputs the raw JSON result to stdout, suitable for piping into `jq`.
/// Failures go to stderr with a non-zero exit code.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a method on a handler by alias
struct CallArgs {
    /// alias of the handler
    #[argh(positional)]
    alias: String,

    /// method to call
    #[argh(positional)]
    method: String,

    /// JSON array of arguments
    #[argh(positional, default = "\"[]\".into()")]
    params: String,

    /// registry address
    #[argh(option, short = 'r')]
    registry: Option<String>,

    /// request timeout in milliseconds
    #[argh(option, default = "5000")]
    timeout_ms: u64,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "lookup")]
/// list the live servers of an alias
struct LookupArgs {
    /// alias to look up
    #[argh(positional)]
    alias: String,

    /// registry address
    #[argh(option, short = 'r')]
    registry: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call and lookup print JSON on stdout; keep it clean.
    if !matches!(cli.command, Commands::Call(_) | Commands::Lookup(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Registry(args) => run_registry(args).await,
        Commands::Serve(args) => run_serve(args).await,
        Commands::Call(args) => run_call(args).await,
        Commands::Lookup(args) => run_lookup(args).await,
    }
}

fn registry_addr(flag: Option<String>) -> String {
    resolve_registry_addr(flag, std::env::var(REGISTRY_ENV).ok())
}

fn resolve_registry_addr(flag: Option<String>, env: Option<String>) -> String {
    flag.or(env)
        .filter(|addr| !addr.is_empty())
        .unwrap_or_else(|| DEFAULT_REGISTRY.to_string())
}

/// Parses the `call` arguments, which must be a JSON array.
fn parse_params(raw: &str) -> Result<Vec<Value>> {
    match serde_json::from_str(raw) {
        Ok(Value::Array(params)) => Ok(params),
        Ok(other) => Err(anyhow::anyhow!("params must be a JSON array, got {}", other)),
        Err(e) => Err(anyhow::anyhow!("Invalid JSON in params: {}", e)),
    }
}

async fn run_registry(args: RegistryArgs) -> Result<()> {
    let server = RegistryServer::bind(&args.bind, Arc::new(MemoryStore::new())).await?;
    tracing::info!("Registry listening on {}", server.local_addr()?);

    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(server.run_until(stop_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down registry");
    let _ = stop_tx.send(true);
    task.await??;
    Ok(())
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let registry = registry_addr(args.registry);
    tracing::info!("Using registry at {}", registry);

    let mut transport = TransportConfig::default();
    transport.host = args.host;
    transport.port = args.port;

    let config = ServerConfig::default()
        .with_registry(RegistryConfig::default().with_ttl(Duration::from_secs(args.ttl)))
        .with_transport(transport)
        .with_handler(HandlerSpec::new(demo::math()).methods(args.only))
        .with_handler(HandlerSpec::new(demo::echo()));

    let builder = RpcServer::builder(config, Arc::new(RemoteStore::new(registry)));
    let mut events = builder.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ServerEvent::Error(e) => tracing::warn!("{}", e),
                ServerEvent::Listening { host, port, server_id } => {
                    tracing::info!("Server {} reachable at {}:{}", server_id, host, port)
                }
                ServerEvent::Call(_) => {}
            }
        }
    });

    let server = builder.start().await?;
    tracing::info!("Serving {:?}", server.aliases().await);

    tokio::signal::ctrl_c().await?;
    server.shutdown().await?;
    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    let params = parse_params(&args.params)?;
    let store = Arc::new(RemoteStore::new(registry_addr(args.registry)));
    let config = ClientConfig::default().with_request_timeout(Duration::from_millis(args.timeout_ms));

    let client = RpcClient::new(config, store);
    let result = client.call(&args.alias, &args.method, params).await?;

    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

async fn run_lookup(args: LookupArgs) -> Result<()> {
    let store = Arc::new(RemoteStore::new(registry_addr(args.registry)));
    let registry = RegistryClient::new(store, RegistryConfig::default());

    for record in registry.lookup(&args.alias).await? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cli_parse_registry_default_bind() {
        let args: Cli = Cli::from_args(&["aliasrpc"], &["registry"]).unwrap();
        match args.command {
            Commands::Registry(RegistryArgs { bind }) => assert_eq!(bind, "0.0.0.0:7379"),
            _ => panic!("Expected Registry command"),
        }
    }

    #[test]
    fn test_cli_parse_serve() {
        let args: Cli = Cli::from_args(
            &["aliasrpc"],
            &["serve", "-r", "10.0.0.1:7379", "--port", "7100", "--only", "add", "--only", "sub"],
        )
        .unwrap();
        match args.command {
            Commands::Serve(ServeArgs { registry, host, port, ttl, only }) => {
                assert_eq!(registry.as_deref(), Some("10.0.0.1:7379"));
                assert!(host.is_none());
                assert_eq!(port, Some(7100));
                assert_eq!(ttl, 30);
                assert_eq!(only, vec!["add", "sub"]);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_call() {
        let args: Cli = Cli::from_args(&["aliasrpc"], &["call", "math", "add", "[2, 3]"]).unwrap();
        match args.command {
            Commands::Call(CallArgs { alias, method, params, registry, timeout_ms }) => {
                assert_eq!(alias, "math");
                assert_eq!(method, "add");
                assert_eq!(params, "[2, 3]");
                assert!(registry.is_none());
                assert_eq!(timeout_ms, 5000);
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_call_default_params() {
        let args: Cli = Cli::from_args(&["aliasrpc"], &["call", "echo", "echo"]).unwrap();
        match args.command {
            Commands::Call(CallArgs { params, .. }) => assert_eq!(params, "[]"),
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_lookup() {
        let args: Cli = Cli::from_args(&["aliasrpc"], &["lookup", "math"]).unwrap();
        match args.command {
            Commands::Lookup(LookupArgs { alias, registry }) => {
                assert_eq!(alias, "math");
                assert!(registry.is_none());
            }
            _ => panic!("Expected Lookup command"),
        }
    }

    #[test]
    fn test_cli_parse_call_missing_method() {
        assert!(Cli::from_args(&["aliasrpc"], &["call", "math"]).is_err());
    }

    #[test]
    fn test_registry_addr_precedence() {
        assert_eq!(
            resolve_registry_addr(Some("a:1".into()), Some("b:2".into())),
            "a:1"
        );
        assert_eq!(resolve_registry_addr(None, Some("b:2".into())), "b:2");
        assert_eq!(resolve_registry_addr(None, None), DEFAULT_REGISTRY);
        assert_eq!(resolve_registry_addr(None, Some(String::new())), DEFAULT_REGISTRY);
    }

    #[test]
    fn test_parse_params() {
        assert_eq!(parse_params("[2, 3]").unwrap(), vec![json!(2), json!(3)]);
        assert!(parse_params("{\"a\": 1}").is_err());
        assert!(parse_params("nope").is_err());
    }
}
