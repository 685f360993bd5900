use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tinychat::auth::{ChainedCredentials, EnvCredentials, JsonFileCredentials};
use tinychat::{AppConfig, CallContext, ConversationHandler, ProviderRegistry};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tinychat")]
#[command(about = "Chat with hosted LLMs from the terminal", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults to ~/.tinychat/config.toml)
    #[arg(short, long, env = "TINYCHAT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available providers
    Providers,
    /// Start an interactive chat
    Chat {
        /// Provider display name, e.g. "Claude 3 Opus"
        #[arg(short, long)]
        provider: String,
        /// Sampling temperature (defaults to the configured value)
        #[arg(short, long)]
        temperature: Option<f32>,
        /// Wait for whole answers instead of streaming
        #[arg(long)]
        no_stream: bool,
    },
    /// Manage stored API keys
    Keys {
        #[command(subcommand)]
        action: KeysCommand,
    },
    /// Write the default configuration file
    Init,
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Store a key, e.g. `tinychat keys set OPENAI_API_KEY sk-...`
    Set { name: String, value: String },
    /// Show which keys are stored (names only)
    List,
    /// Remove a stored key
    Remove { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so streamed answers on stdout stay clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tinychat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        let path = cli.config.unwrap_or_else(AppConfig::default_path);
        AppConfig::write_default(&path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config = AppConfig::load(cli.config.as_deref())?;
    let store = JsonFileCredentials::load(&config.secrets_file)
        .with_context(|| format!("Failed to open {}", config.secrets_file.display()))?;

    match cli.command {
        Commands::Providers => {
            let registry = ProviderRegistry::new(Arc::new(store));
            for name in registry.list_providers() {
                println!("{}", name);
            }
        }
        Commands::Chat {
            provider,
            temperature,
            no_stream,
        } => {
            let credentials = ChainedCredentials::new().push(store).push(EnvCredentials);
            let registry = ProviderRegistry::from_config(&config, Arc::new(credentials))?;
            let temperature = temperature.unwrap_or(config.default_temperature);
            let handler = registry.select_provider(&provider, temperature)?;

            run_chat(handler, &config, !no_stream).await?;
        }
        Commands::Keys { action } => match action {
            KeysCommand::Set { name, value } => {
                store.set(&name, &value)?;
                println!("Stored {} in {}", name, store.path().display());
            }
            KeysCommand::List => {
                for name in store.names() {
                    println!("{}", name);
                }
            }
            KeysCommand::Remove { name } => {
                store.remove(&name)?;
                println!("Removed {}", name);
            }
        },
        Commands::Init => unreachable!("handled before configuration is loaded"),
    }

    Ok(())
}

/// Line-oriented chat loop on stdin
async fn run_chat(
    mut handler: ConversationHandler,
    config: &AppConfig,
    stream: bool,
) -> anyhow::Result<()> {
    println!(
        "Chatting with {}. Commands: /export [path], /reset, /quit",
        handler.provider_name()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let input = line.trim();

        if let Some(arg) = export_argument(input) {
            let path = match arg {
                "" => PathBuf::from(default_export_name()),
                path => PathBuf::from(path),
            };
            std::fs::write(&path, handler.export_conversation())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Saved conversation to {}", path.display());
            continue;
        }

        match input {
            "" => continue,
            "/quit" => break,
            "/reset" => {
                handler.reset();
                println!("Started a new chat.");
                continue;
            }
            _ => {}
        }

        // Ctrl+C cancels the call in flight instead of exiting
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            }
        });
        let ctx = CallContext::new()
            .with_cancel(cancel)
            .with_timeout(config.request_timeout());

        print!("LLM: ");
        std::io::stdout().flush()?;

        if stream {
            let mut fragments = handler.stream_response_with(input, ctx);
            while let Some(fragment) = fragments.next().await {
                match fragment {
                    Ok(text) => {
                        print!("{}", text);
                        std::io::stdout().flush()?;
                    }
                    Err(e) => {
                        eprintln!("\n[{}]", e);
                        break;
                    }
                }
            }
            println!();
        } else {
            match handler.get_response_with(input, ctx).await {
                Ok(answer) => println!("{}", answer),
                Err(e) => eprintln!("[{}]", e),
            }
        }

        watcher.abort();
    }

    Ok(())
}

fn default_export_name() -> String {
    format!("tinychat-{}.txt", chrono::Local::now().format("%Y%m%d-%H%M%S"))
}

/// Path argument of an `/export` command; `None` when the line is not one
fn export_argument(input: &str) -> Option<&str> {
    let rest = input.strip_prefix("/export")?;
    (rest.is_empty() || rest.starts_with(char::is_whitespace)).then(|| rest.trim())
}
