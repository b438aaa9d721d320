use clap::{Parser, Subcommand};
use relay::command::{help_text, parse_command, Command};
use relay::config::{self, Config};
use relay::transport::{HttpTransport, Reply, ScriptedAgent, ScriptedTransport, Transport};
use relay::{AgentDispatcher, Platform, RequestKind, Resolution, ResolveError};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Args)]
struct ResolveOpts {
    /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,

    /// Give up after this many seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Use built-in scripted bots instead of the userbot bridge.
    #[arg(long)]
    demo: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json with the built-in bot table.
    Init {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List the fetch commands for every configured platform.
    Platforms {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Fetch content for a link through the platform's responder bots.
    Resolve {
        /// Platform name (tiktok, reddit, twitter, youtube).
        platform: Platform,

        /// Link to fetch.
        link: String,

        #[command(flatten)]
        opts: ResolveOpts,
    },

    /// Run one dot-command, e.g. ".tiktok https://vm.tiktok.com/..." or ".start".
    Run {
        /// Command line to run.
        line: String,

        #[command(flatten)]
        opts: ResolveOpts,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let code = match cli.command {
        Some(Commands::Version) => {
            println!("relay {}", env!("CARGO_PKG_VERSION"));
            0
        }
        Some(Commands::Init { config }) => match run_init(config) {
            Ok(()) => 0,
            Err(e) => {
                log::error!("init failed: {:#}", e);
                1
            }
        },
        Some(Commands::Platforms { config }) => match config::load_config(config) {
            Ok((config, _)) => {
                print!("{}", help_text(&config));
                0
            }
            Err(e) => {
                log::error!("loading config failed: {:#}", e);
                1
            }
        },
        Some(Commands::Resolve {
            platform,
            link,
            opts,
        }) => run_resolve(platform, &link, &opts).await,
        Some(Commands::Run { line, opts }) => match parse_command(&line) {
            Some(Command::Fetch { platform, link }) => run_resolve(platform, &link, &opts).await,
            Some(Command::Help) => match config::load_config(opts.config) {
                Ok((config, _)) => {
                    print!("{}", help_text(&config));
                    0
                }
                Err(e) => {
                    log::error!("loading config failed: {:#}", e);
                    1
                }
            },
            None => {
                eprintln!("not a command: {:?} (try \".start\")", line);
                2
            }
        },
        None => {
            println!("Run with --help for usage");
            0
        }
    };
    std::process::exit(code);
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = relay::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_resolve(platform: Platform, link: &str, opts: &ResolveOpts) -> i32 {
    let (config, _) = match config::load_config(opts.config.clone()) {
        Ok(c) => c,
        Err(e) => {
            log::error!("loading config failed: {:#}", e);
            return 1;
        }
    };
    let transport: Arc<dyn Transport> = if opts.demo {
        Arc::new(demo_transport(&config).await)
    } else {
        let url = config::resolve_bridge_url(&config);
        let token = config::resolve_bridge_token(&config);
        let timeout = Duration::from_millis(config.transport.request_timeout_ms);
        match HttpTransport::new(url, token, timeout) {
            Ok(t) => Arc::new(t),
            Err(e) => {
                log::error!("creating bridge client failed: {}", e);
                return 1;
            }
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupted, cancelling");
            on_signal.cancel();
        }
    });
    if let Some(secs) = opts.timeout {
        let on_timeout = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            log::info!("timeout of {}s reached, cancelling", secs);
            on_timeout.cancel();
        });
    }

    if !opts.json {
        eprintln!("⏳ fetching {} content...", platform.display_name());
    }
    let dispatcher = AgentDispatcher::new(transport, Arc::new(config));
    match dispatcher.resolve_cancellable(platform, link, cancel).await {
        Ok(resolution) => {
            print_resolution(&resolution, opts.json);
            0
        }
        Err(e) => {
            print_failure(platform, &e, opts.json);
            1
        }
    }
}

fn print_resolution(resolution: &Resolution, json: bool) {
    if json {
        match serde_json::to_string_pretty(resolution) {
            Ok(s) => println!("{}", s),
            Err(e) => log::error!("serializing result failed: {}", e),
        }
        return;
    }
    println!(
        "{} delivered {} item(s) in {} ms{}",
        resolution.agent,
        resolution.items.len(),
        resolution.elapsed_ms,
        if resolution.degraded { " (album cut short)" } else { "" }
    );
    for item in &resolution.items {
        println!("  {}", item.identity);
    }
}

fn print_failure(platform: Platform, err: &ResolveError, json: bool) {
    let per_agent: Vec<String> = match err {
        ResolveError::AllAgentsExhausted { failures, .. } => {
            failures.iter().map(ToString::to_string).collect()
        }
        _ => Vec::new(),
    };
    if json {
        let body = serde_json::json!({ "reason": err.to_string(), "perAgentReasons": per_agent });
        println!("{}", body);
        return;
    }
    match err {
        ResolveError::AllAgentsExhausted { .. } => {
            eprintln!(
                "⚠️ no bot could deliver {} content:",
                platform.display_name()
            );
            for reason in &per_agent {
                eprintln!("  {}", reason);
            }
        }
        other => eprintln!("⚠️ {}", other),
    }
}

/// Scripted bots matching every configured platform's interaction kind.
///
/// A bot listed under several platforms is scripted once, for the first of them.
async fn demo_transport(config: &Config) -> ScriptedTransport {
    let transport = ScriptedTransport::new();
    let step = Duration::from_millis(config.timing.poll_interval_ms.max(1));
    let mut scripted = HashSet::new();
    for (platform, pc) in &config.platforms {
        for agent in &pc.agents {
            if !scripted.insert(agent.as_str()) {
                continue;
            }
            let media = |n: usize| Reply::media(format!("{}-demo-{}", platform, n));
            let script = match pc.kind {
                RequestKind::Simple => ScriptedAgent::silent().on_send(media(1).after(step)),
                RequestKind::Negotiated => {
                    // Each round's prompt answers the best label of the round before.
                    let mut script = ScriptedAgent::silent();
                    let mut trigger: Option<&str> = None;
                    for round in &pc.preferences {
                        let labels: Vec<&str> = round.iter().map(String::as_str).collect();
                        let prompt = Reply::prompt("Choose an option", &labels).after(step);
                        script = match trigger {
                            None => script.on_send(prompt),
                            Some(label) => script.on_choice(label, prompt),
                        };
                        trigger = round.first().map(String::as_str).or(trigger);
                    }
                    match trigger {
                        None => script.on_send(media(1).after(step)),
                        Some(label) => script.on_choice(label, media(1).after(step)),
                    }
                }
                RequestKind::Aggregated => ScriptedAgent::silent()
                    .on_send(media(1).after(step))
                    .on_send(media(2).after(step * 2))
                    .on_send(media(3).after(step * 3)),
            };
            transport.add_agent(agent.clone(), script).await;
        }
    }
    transport
}
