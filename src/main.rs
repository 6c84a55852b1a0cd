use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mrpd::config::MrpConfig;
use mrpd::error::{causal_chain, MrpError, NotFoundError};
use mrpd::handlers::ProviderState;
use mrpd::publish::{ChallengeProbe, PublishError, PublishEvent, PublishOptions, Publisher};
use mrpd::registry::RegistryClient;
use mrpd::router::{self, Orchestrator, RouteRequest, RunRequest, MAX_ROUTE_LIMIT};
use mrpd::{http, schema, server};

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;

/// Moltrouter Protocol daemon and client
#[derive(Parser)]
#[command(name = "mrpd", version, about, long_about = None)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MRP HTTP server with the built-in provider
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },

    /// Validate an MRP envelope against the bundled schema
    Validate {
        /// JSON file path or '-' for stdin
        #[arg(long, default_value = "-")]
        path: String,
    },

    /// Query the registry and rank candidates for an intent
    Route {
        /// High-level intent (human text)
        intent: String,
        #[arg(long)]
        capability: Option<String>,
        #[arg(long)]
        policy: Option<String>,
        /// Registry base URL
        #[arg(long)]
        registry: Option<String>,
        /// Fallback raw registry JSON (URL or file://path)
        #[arg(long)]
        bootstrap_raw: Option<String>,
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..=MAX_ROUTE_LIMIT as i64))]
        limit: u32,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// DISCOVER then EXECUTE against the best matching provider
    Run {
        /// High-level intent (human text)
        intent: String,
        /// URL input
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "summarize_url")]
        capability: String,
        #[arg(long)]
        policy: Option<String>,
        #[arg(long)]
        registry: Option<String>,
        #[arg(long)]
        bootstrap_raw: Option<String>,
        /// Skip the registry and use this provider manifest
        #[arg(long)]
        manifest_url: Option<String>,
        /// Soft max context tokens (constraint hint)
        #[arg(long)]
        max_tokens: Option<u64>,
        /// Max cost (constraint hint)
        #[arg(long)]
        max_cost: Option<f64>,
    },

    /// Self-register a provider manifest using an HTTP-01 challenge
    Publish {
        #[arg(long)]
        manifest_url: String,
        #[arg(long)]
        registry: Option<String>,
        #[arg(long, default_value_t = 5.0)]
        poll_seconds: f64,
        /// Give up after this many verification attempts
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Print version
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match MrpConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mrpd: configuration error: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match cli.command {
        Commands::Serve { host, port } => serve(&config, SocketAddr::new(host, port)).await,
        Commands::Validate { path } => validate(&path),
        Commands::Route {
            intent,
            capability,
            policy,
            registry,
            bootstrap_raw,
            limit,
            json,
        } => {
            apply_overrides(&mut config, registry, bootstrap_raw);
            let request = RouteRequest {
                intent,
                capability,
                policy,
                limit,
            };
            route(&config, &request, json).await
        }
        Commands::Run {
            intent,
            url,
            capability,
            policy,
            registry,
            bootstrap_raw,
            manifest_url,
            max_tokens,
            max_cost,
        } => {
            apply_overrides(&mut config, registry, bootstrap_raw);
            let request = RunRequest {
                intent,
                url,
                capability,
                policy,
                manifest_url,
                max_tokens,
                max_cost,
            };
            run(&config, &request).await
        }
        Commands::Publish {
            manifest_url,
            registry,
            poll_seconds,
            max_attempts,
        } => {
            apply_overrides(&mut config, registry, None);
            let options = PublishOptions::new(poll_seconds, max_attempts);
            publish(&config, &manifest_url, options).await
        }
        Commands::Version => {
            println!("mrpd {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
    }
}

fn apply_overrides(config: &mut MrpConfig, registry: Option<String>, bootstrap_raw: Option<String>) {
    if let Some(base) = registry {
        config.registry_base = base;
    }
    if let Some(raw) = bootstrap_raw {
        config.bootstrap_raw = Some(raw).filter(|s| !s.is_empty());
    }
}

fn fail(err: &dyn std::error::Error) -> ExitCode {
    eprintln!("mrpd: {}", causal_chain(err));
    ExitCode::from(EXIT_FAILURE)
}

async fn serve(config: &MrpConfig, addr: SocketAddr) -> ExitCode {
    let state = match ProviderState::from_config(config) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    match server::serve(addr, state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn validate(path: &str) -> ExitCode {
    let mut raw = String::new();
    let read = if path == "-" {
        std::io::stdin().read_to_string(&mut raw).map(|_| ())
    } else {
        std::fs::read_to_string(path).map(|s| raw = s)
    };
    if let Err(e) = read {
        eprintln!("mrpd: cannot read {path}: {e}");
        return ExitCode::from(EXIT_USAGE);
    }

    let envelope: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Invalid JSON: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    match schema::validate_envelope(&envelope) {
        Ok(()) => {
            println!("OK");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("INVALID: {e}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn route(config: &MrpConfig, request: &RouteRequest, json: bool) -> ExitCode {
    let registry = match RegistryClient::from_config(config) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };
    let client = match http::protocol_client() {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };

    let report = match router::route(&registry, &client, config.manifest_timeout, request).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Registry query failed: {}", causal_chain(&e));
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{s}"),
            Err(e) => return fail(&e),
        }
    } else {
        print!("{}", report.render());
    }

    if report.has_winner() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILURE)
    }
}

async fn run(config: &MrpConfig, request: &RunRequest) -> ExitCode {
    let orchestrator = match RegistryClient::from_config(config)
        .map_err(MrpError::from)
        .and_then(|registry| Orchestrator::new(config, registry).map_err(MrpError::from))
    {
        Ok(o) => o,
        Err(e) => return fail(&e),
    };

    match orchestrator.run(request).await {
        Ok(outcome) => {
            match serde_json::to_string_pretty(&outcome.evidence) {
                Ok(s) => println!("{s}"),
                Err(e) => return fail(&e),
            }
            eprintln!("evidence bundle: {}", outcome.bundle_path.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            match &err.source {
                MrpError::NotFound(NotFoundError::NoneSatisfied { near_misses }) => {
                    eprintln!("No candidates satisfied the requested requirements. Near-miss list:");
                    for m in near_misses {
                        eprintln!("- score={:.2} id={} name={}", m.score, m.id, m.name);
                        eprintln!("  missing: {}", m.missing.join(", "));
                    }
                }
                MrpError::NotFound(NotFoundError::NoCandidates) if request.manifest_url.is_none() => {
                    eprintln!("Tip: use --manifest-url http://host/mrp/manifest for local testing.");
                }
                MrpError::Provider { payload, .. } => {
                    if let Ok(s) = serde_json::to_string_pretty(payload) {
                        println!("{s}");
                    }
                }
                _ => {}
            }
            fail(&err)
        }
    }
}

async fn publish(config: &MrpConfig, manifest_url: &str, options: PublishOptions) -> ExitCode {
    let publisher = match Publisher::new(&config.registry_base, config.registry_timeout) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    let registry = publisher.registry_base().to_string();

    let result = publisher
        .publish(manifest_url, options, |event| match event {
            PublishEvent::Challenge(challenge) => {
                println!("\n{}", challenge.instructions(&registry, manifest_url));
                println!("When ready, I will verify and publish the entry.");
            }
            PublishEvent::Pending { error, probe, .. } => {
                println!("Waiting… ({error})");
                match probe {
                    ChallengeProbe::Matches => {}
                    ChallengeProbe::Mismatch { served } => {
                        println!("  challenge URL currently serves: {:?}", served)
                    }
                    ChallengeProbe::Unreachable { error } => {
                        println!("  challenge URL not reachable: {error}")
                    }
                }
            }
            PublishEvent::Published(entry) => {
                println!("\nVerified and published:");
                println!(
                    "{}",
                    serde_json::to_string_pretty(entry).unwrap_or_else(|_| entry.to_string())
                );
            }
        })
        .await;

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e @ PublishError::InvalidManifestUrl { .. }) => {
            eprintln!("Invalid manifest_url: {e}");
            ExitCode::from(EXIT_USAGE)
        }
        Err(PublishError::MalformedChallenge(data)) => {
            eprintln!("Registry returned malformed challenge:");
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string())
            );
            ExitCode::from(EXIT_FAILURE)
        }
        Err(e) => fail(&e),
    }
}
