// Copyright 2026 Unbrowser Contributors
// SPDX-License-Identifier: MIT

//! Unbrowser CLI entry point.

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use unbrowser::{AcquireOptions, ContentFormat, Tier, VerificationMode};
use unbrowser_cli::output;

#[derive(Parser)]
#[command(
    name = "unbrowser",
    about = "Fetch web content through the cheapest tier that works, and learn from every call",
    version
)]
struct Cli {
    /// Knowledge store (.json, or .db/.sqlite for SQLite).
    #[arg(long, global = true)]
    store: Option<String>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG overrides.
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    /// Proxy URL for the lightweight tier. Repeat to build a rotating pool.
    #[arg(long = "proxy", global = true)]
    proxies: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct RequestArgs {
    /// Most expensive tier to escalate to (intelligence, lightweight, playwright).
    #[arg(long, default_value = "playwright")]
    max_cost_tier: Tier,

    /// Overall latency budget in milliseconds.
    #[arg(long)]
    max_latency_ms: Option<u64>,

    /// Verification strictness (basic, standard, thorough) or "off".
    #[arg(long, default_value = "basic")]
    verify: String,

    /// Truncate returned content to this many characters.
    #[arg(long)]
    max_chars: Option<usize>,

    /// Content format (markdown, text).
    #[arg(long, default_value = "markdown")]
    content_type: String,

    /// Print the full JSON response instead of text.
    #[arg(long)]
    json: bool,
}

impl RequestArgs {
    fn options(&self) -> anyhow::Result<AcquireOptions> {
        let mut options = AcquireOptions {
            max_latency_ms: self.max_latency_ms,
            max_cost_tier: self.max_cost_tier,
            max_chars: self.max_chars,
            ..AcquireOptions::default()
        };
        match self.verify.to_ascii_lowercase().as_str() {
            "off" | "none" => options.verify.enabled = false,
            "basic" => options.verify.mode = VerificationMode::Basic,
            "standard" => options.verify.mode = VerificationMode::Standard,
            "thorough" => options.verify.mode = VerificationMode::Thorough,
            other => anyhow::bail!("unknown verify mode '{other}'"),
        }
        options.content_type = match self.content_type.to_ascii_lowercase().as_str() {
            "markdown" | "md" => ContentFormat::Markdown,
            "text" | "plain" => ContentFormat::Text,
            other => anyhow::bail!("unknown content type '{other}'"),
        };
        Ok(options)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire a URL's main content.
    Acquire {
        url: String,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Show the plan `acquire` would follow, without fetching anything.
    Preview {
        url: String,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Show what has been learned about a domain.
    Intel {
        domain: String,
    },

    /// Acquire several URLs with bounded concurrency.
    Batch {
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   unbrowser completions bash > ~/.local/share/bash-completion/completions/unbrowser
    ///   unbrowser completions zsh > ~/.zfunc/_unbrowser
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "unbrowser", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(&cli.log_level, cli.log_json);

    let config = unbrowser_cli::load_engine_config()?;
    let store_path = unbrowser_cli::resolve_store_path(cli.store.as_deref());
    tracing::debug!(store = %store_path.display(), "using knowledge store");
    let knowledge = unbrowser_cli::open_knowledge(&store_path, &config)?;
    let orchestrator =
        unbrowser_cli::build_orchestrator(knowledge.clone(), config, &cli.proxies)?;

    let mut exit_code = 0;
    match cli.command {
        Commands::Acquire { url, request } => {
            let response = orchestrator.acquire(&url, &request.options()?).await;
            if !response.is_success() {
                exit_code = 1;
            }
            if request.json {
                print_json(&response)?;
            } else {
                print!("{}", output::render_acquire(&response));
            }
        }

        Commands::Preview { url, request } => {
            let preview = orchestrator
                .preview(&url, &request.options()?)
                .await
                .context("cannot preview")?;
            if request.json {
                print_json(&preview)?;
            } else {
                print!("{}", output::render_preview(&preview));
            }
        }

        Commands::Intel { domain } => {
            let domain = unbrowser::domain_of(&domain)
                .or_else(|| unbrowser::domain_of(&format!("https://{domain}")))
                .unwrap_or(domain);
            let intel = knowledge
                .domain_intelligence(&domain)
                .await
                .with_context(|| format!("failed to read knowledge for {domain}"))?;
            print_json(&intel)?;
        }

        Commands::Batch { urls, request } => {
            let batch = orchestrator.acquire_batch(&urls, &request.options()?).await;
            if batch.failed() > 0 {
                exit_code = 1;
            }
            if request.json {
                print_json(&batch)?;
            } else {
                print!("{}", output::render_batch(&batch));
            }
        }

        Commands::Completions { .. } => {}
    }

    knowledge
        .store()
        .flush()
        .await
        .context("failed to flush knowledge store")?;

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
