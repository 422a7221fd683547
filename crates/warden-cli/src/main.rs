//! mcp-warden command-line interface.
//!
//! Launches the wrapper around a downstream MCP server, or runs one of the
//! side modes: listing guardrail providers, reviewing a server's pinned
//! configuration, or reviewing the quarantine.
//!
//! Exit codes: 0 clean shutdown, 1 usage error, 2 downstream unreachable at
//! startup, 3 review declined or aborted.

mod review;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use warden_guardrails::ProviderRegistry;
use warden_proxy::wrapper::serve_stdio;
use warden_proxy::{DownstreamClient, Transport, WrapperServer};
use warden_store::{ApprovalStore, QuarantineStore};
use warden_types::config::WrapperConfig;
use warden_types::errors::WardenError;

const EXIT_OK: u8 = 0;
const EXIT_USAGE: u8 = 1;
const EXIT_UNREACHABLE: u8 = 2;
const EXIT_DECLINED: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "mcp-warden")]
#[command(about = "Trust-on-first-use security wrapper for MCP servers")]
struct Args {
    /// Start a wrapped server over stdio using the given command string.
    #[arg(long)]
    command: Option<String>,

    /// Start a wrapped server over stdio from command words (supports
    /// arguments with dashes, e.g. --command-args docker run --rm -i img).
    #[arg(long = "command-args", num_args = 1.., allow_hyphen_values = true)]
    command_args: Option<Vec<String>>,

    /// Connect to a remote MCP server over streamable HTTP.
    #[arg(long)]
    url: Option<String>,

    /// Connect to a remote MCP server over SSE.
    #[arg(long = "sse-url")]
    sse_url: Option<String>,

    /// Guardrail provider to scan tool responses with.
    #[arg(long = "guardrail-provider")]
    guardrail_provider: Option<String>,

    /// List available guardrail providers and exit.
    #[arg(long = "list-guardrail-providers")]
    list_guardrail_providers: bool,

    /// Review and approve the configuration of the selected server.
    #[arg(long = "review-server")]
    review_server: bool,

    /// List every server with a pinned configuration.
    #[arg(long = "review-all-servers")]
    review_all_servers: bool,

    /// Review quarantined tool responses.
    #[arg(long = "review-quarantine")]
    review_quarantine: bool,

    /// A specific quarantined response to review.
    #[arg(long = "quarantine-id")]
    quarantine_id: Option<String>,

    /// Path to the approval store file (default: ~/.mcp-warden/servers.json).
    #[arg(long = "server-config-file")]
    server_config_file: Option<PathBuf>,

    /// Path to the quarantine file (default: ~/.mcp-warden/quarantine.json).
    #[arg(long = "quarantine-path")]
    quarantine_path: Option<PathBuf>,

    /// Make ANSI escape codes visible instead of stripping them.
    #[arg(long = "visualize-ansi-codes")]
    visualize_ansi_codes: bool,
}

impl Args {
    /// Resolve the downstream connection flags into a wrapper config.
    /// Exactly one of command / command-args / url / sse-url must be given.
    fn wrapper_config(&self) -> Result<WrapperConfig, WardenError> {
        let command = match (&self.command, &self.command_args) {
            (Some(_), Some(_)) => {
                return Err(WardenError::Config(
                    "--command and --command-args are mutually exclusive".to_string(),
                ))
            }
            (Some(command), None) => Some(command.clone()),
            (None, Some(words)) => Some(words.join(" ")),
            (None, None) => None,
        };

        let mut config = match (command, &self.url, &self.sse_url) {
            (Some(command), None, None) => WrapperConfig::for_stdio(&command)?,
            (None, Some(url), None) => WrapperConfig::for_http(url)?,
            (None, None, Some(url)) => WrapperConfig::for_sse(url)?,
            (None, None, None) => {
                return Err(WardenError::Config(
                    "one of --command, --command-args, --url, or --sse-url is required".to_string(),
                ))
            }
            _ => {
                return Err(WardenError::Config(
                    "--command, --url, and --sse-url are mutually exclusive".to_string(),
                ))
            }
        };

        config.server_config_file = self.server_config_file.clone();
        config.quarantine_path = self.quarantine_path.clone();
        config.guardrail_provider = self.guardrail_provider.clone();
        config.visualize_ansi_codes = self.visualize_ansi_codes;
        Ok(config)
    }
}

fn main() -> ExitCode {
    // Logs go to stderr: stdout is the host-facing protocol stream.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help and version are clean exits, everything else is misuse.
            use clap::error::ErrorKind;
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::from(EXIT_OK),
                _ => ExitCode::from(EXIT_USAGE),
            };
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    ExitCode::from(runtime.block_on(run(args)))
}

async fn run(args: Args) -> u8 {
    let registry = ProviderRegistry::builtin();

    if args.list_guardrail_providers {
        let names = registry.names();
        if names.is_empty() {
            println!("No guardrail providers found.");
        } else {
            println!("Available guardrail providers:");
            for name in names {
                println!("  - {name}");
            }
        }
        return EXIT_OK;
    }

    if args.review_quarantine {
        let store = match QuarantineStore::open(args.quarantine_path.clone()) {
            Ok(store) => store,
            Err(e) => {
                eprintln!("Error: {e}");
                return EXIT_USAGE;
            }
        };
        return review::review_quarantine(&store, args.quarantine_id.as_deref());
    }

    if args.review_all_servers {
        let store = match ApprovalStore::open(args.server_config_file.clone()) {
            Ok(store) => store,
            Err(e) => {
                eprintln!("Error: {e}");
                return EXIT_USAGE;
            }
        };
        return review::list_pinned_servers(&store);
    }

    let config = match args.wrapper_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_USAGE;
        }
    };

    // Resolve the provider before touching the network so a typo fails fast.
    let guardrail = match &config.guardrail_provider {
        Some(name) => match registry.get(name) {
            Ok(provider) => Some(provider),
            Err(e) => {
                eprintln!("Error: {e}");
                return EXIT_USAGE;
            }
        },
        None => None,
    };

    if args.review_server {
        return review::review_server(&config).await;
    }

    serve(config, guardrail).await
}

/// Normal operation: connect downstream and serve the wrapper on stdio.
async fn serve(
    config: WrapperConfig,
    guardrail: Option<Arc<dyn warden_types::traits::GuardrailProvider>>,
) -> u8 {
    let approvals = match ApprovalStore::open(config.server_config_file.clone()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_USAGE;
        }
    };
    let quarantine = if config.use_guardrails() {
        match QuarantineStore::open(config.quarantine_path.clone()) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                eprintln!("Error: {e}");
                return EXIT_USAGE;
            }
        }
    } else {
        None
    };

    let transport = match Transport::connect(&config.identity).await {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            eprintln!("Error: cannot reach downstream server: {e}");
            return EXIT_UNREACHABLE;
        }
    };
    let downstream = Arc::new(DownstreamClient::new(transport));

    let (server, outbox) = match WrapperServer::start(
        config,
        downstream,
        approvals,
        quarantine,
        guardrail,
    )
    .await
    {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Error: downstream initialization failed: {e}");
            return EXIT_UNREACHABLE;
        }
    };

    info!("wrapper ready, serving host on stdio");
    match serve_stdio(server, outbox).await {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("Error: {e}");
            EXIT_UNREACHABLE
        }
    }
}
