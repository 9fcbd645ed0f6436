use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;

use bazaar_bot::application::commands::{CallbackOutcome, CommandOutcome};
use bazaar_bot::domain::entities::{ChatMessage, Interaction, PluginInfo};
use bazaar_bot::infrastructure::adapters::console::{ConsoleInput, ConsoleMarketplace, ConsoleReader};
use bazaar_bot::{plugins, BotError, Config, PluginHost};

const CONSOLE_CHAT: &str = "console";
const CONSOLE_USER: &str = "console-user";

#[derive(Parser)]
#[command(name = "bazaar-bot")]
#[command(about = "Plugin runtime for marketplace chat bots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot with the console front-end
    Run,
    /// Load plugins and show their state
    List,
    /// Show version
    Version,
    /// Write the default config file
    InitConfig,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run => block_on(run_bot(load_config(&cli.config))),
        Commands::List => block_on(list_plugins(load_config(&cli.config))),
        Commands::Version => {
            println!("bazaar-bot v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::InitConfig => init_config(&cli.config),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn block_on<F: std::future::Future<Output = Result<(), BotError>>>(fut: F) -> Result<(), BotError> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| BotError::Internal(format!("Failed to start runtime: {}", e)))?;
    rt.block_on(fut)
}

fn load_config(config_path: &str) -> Config {
    if Path::new(config_path).exists() {
        Config::load(config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::load_env()
        })
    } else {
        Config::load_env()
    }
}

async fn run_bot(config: Config) -> Result<(), BotError> {
    let marketplace = Arc::new(ConsoleMarketplace::new());
    let host = PluginHost::from_config(&config, marketplace.clone()).await?;
    host.load(plugins::builtin_modules());
    let enabled = host.start().await;
    tracing::info!("Starting {}: {} plugin(s) enabled", config.bot.name, enabled);
    println!("Type :list, :commands, :enable/:disable/:delete <id>, /command, !callback, @order, or a message. :quit exits.");

    let mut reader = ConsoleReader::new(config.bot.prefix.clone());
    let mut message_seq: u64 = 0;
    loop {
        tokio::select! {
            input = reader.next_input() => {
                let Some(input) = input else { break };
                if !handle_input(&host, &marketplace, input, &mut message_seq).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    host.shutdown().await;
    Ok(())
}

/// Returns false when the console should stop
async fn handle_input(
    host: &PluginHost,
    marketplace: &ConsoleMarketplace,
    input: ConsoleInput,
    message_seq: &mut u64,
) -> bool {
    match input {
        ConsoleInput::Empty => {}
        ConsoleInput::Quit => return false,
        ConsoleInput::Invalid(reason) => println!("{}", reason),
        ConsoleInput::List => print_plugins(&host.list()),
        ConsoleInput::Commands => {
            for cmd in host.commands() {
                println!("/{} - {} [{}]", cmd.token, cmd.description, cmd.plugin_id);
            }
            for cb in host.callbacks() {
                println!("!{} [{}]", cb.token, cb.plugin_id);
            }
        }
        ConsoleInput::Enable(id) => report(&id, "enabled", host.enable(&id).await),
        ConsoleInput::Disable(id) => report(&id, "disabled", host.disable(&id).await),
        ConsoleInput::Delete(id) => report(&id, "deleted", host.delete(&id).await),
        ConsoleInput::Command(text) => match host.parse_command(CONSOLE_CHAT, &text, Some(CONSOLE_USER)) {
            None => println!("Not a command: {}", text),
            Some(invocation) => match host.handle_command(invocation).await {
                CommandOutcome::Unknown => println!("Unknown command"),
                CommandOutcome::Filtered { plugin_id } => println!("Command not available here ({})", plugin_id),
                CommandOutcome::Handled { .. } => {}
                CommandOutcome::Failed(failure) => println!("Error: {}", failure),
            },
        },
        ConsoleInput::Callback(data) => {
            let interaction = Interaction::new(CONSOLE_CHAT, data).with_user(CONSOLE_USER);
            match host.handle_callback(interaction).await {
                CallbackOutcome::Unmatched => println!("No plugin handles that callback"),
                CallbackOutcome::Handled { .. } => {}
                CallbackOutcome::Failed(failure) => println!("Error: {}", failure),
            }
        }
        ConsoleInput::Order(order) => {
            marketplace.record_order(order.clone());
            let report = host.new_order(order).wait().await;
            tracing::debug!("NEW_ORDER delivered to {} handler(s)", report.invoked);
        }
        ConsoleInput::Message(text) => {
            *message_seq += 1;
            let message = ChatMessage::new(CONSOLE_CHAT, CONSOLE_USER, text, format!("m{}", message_seq));
            let report = host.new_message(message).wait().await;
            tracing::debug!("NEW_MESSAGE delivered to {} handler(s)", report.invoked);
        }
    }
    true
}

fn report(id: &str, done: &str, result: Result<(), bazaar_bot::PluginError>) {
    match result {
        Ok(()) => println!("Plugin {} {}", id, done),
        Err(e) => println!("Error: {}", e),
    }
}

fn print_plugins(plugins: &[PluginInfo]) {
    if plugins.is_empty() {
        println!("No plugins loaded");
        return;
    }
    for p in plugins {
        println!(
            "{:<24} {:<9} v{:<8} {} by {} ({} command(s), {} task(s))",
            p.meta.id,
            p.state,
            p.meta.version,
            p.meta.name,
            p.meta.author,
            p.commands.len(),
            p.background_tasks
        );
    }
}

async fn list_plugins(config: Config) -> Result<(), BotError> {
    let host = PluginHost::from_config(&config, Arc::new(ConsoleMarketplace::new())).await?;
    host.load(plugins::builtin_modules());
    print_plugins(&host.list());
    Ok(())
}

fn init_config(path: &str) -> Result<(), BotError> {
    if Path::new(path).exists() {
        return Err(BotError::Internal(format!("{} already exists", path)));
    }
    let yaml = Config::default().to_yaml()?;
    std::fs::write(path, yaml).map_err(|e| BotError::Internal(format!("Failed to write {}: {}", path, e)))?;
    println!("Wrote {}; adjust as needed.", path);
    Ok(())
}
