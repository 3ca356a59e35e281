//! Sass Chat
//!
//! Terminal host for the persona chat. Replies are typed out at the persona's
//! pace; typing a new line while a reply is still streaming or being typed
//! interrupts it.
//!
//! # Usage
//!
//! ```bash
//! # Talk to the provider directly (needs OPENAI_API_KEY)
//! sass-chat --persona grandma
//!
//! # Through a running sass-server
//! sass-chat --server http://127.0.0.1:3000
//!
//! # No network at all
//! sass-chat --offline
//! ```
//!
//! # Commands
//!
//! - `/persona <slug>`: switch persona (clears the conversation)
//! - `/retry`: ask again after a failed reply
//! - `/stop`: cut the current reply off
//! - `/quit`: exit

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use sass_core::{
    default_config_path, load_config_from_path, ChatBackend, ChatController, ChatEvent,
    ConfigOverrides, ControllerConfig, MessageId, OpenAiBackend, Persona, PersonaBackend,
    RelayClient, RevealView, ScriptedBackend, Typewriter,
};

/// Terminal client for sass-gpt
#[derive(Debug, Parser)]
#[command(name = "sass-chat", version, about)]
struct Args {
    /// Persona to start with
    #[arg(long, default_value = "teenager")]
    persona: Persona,

    /// Use a running sass-server instead of calling the provider directly
    #[arg(long, conflicts_with = "offline")]
    server: Option<String>,

    /// Use canned replies, no network
    #[arg(long)]
    offline: bool,

    /// Config file (default: ~/.config/sass-gpt/sass.toml)
    #[arg(long, env = "SASS_CONFIG")]
    config: Option<PathBuf>,

    /// Provider model
    #[arg(long)]
    model: Option<String>,
}

enum Command {
    Quit,
    Retry,
    Stop,
    Persona(String),
    Say(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let command = match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest.trim())) {
        ("/quit" | "/exit", _) => Command::Quit,
        ("/retry", _) => Command::Retry,
        ("/stop", _) => Command::Stop,
        ("/persona", slug) => Command::Persona(slug.to_string()),
        _ => Command::Say(line.to_string()),
    };
    Some(command)
}

/// Prints the typewriter output incrementally
#[derive(Default)]
struct Printer {
    message_id: Option<MessageId>,
    printed: String,
}

impl Printer {
    fn render(&mut self, view: &RevealView, persona: Persona) {
        let mut out = std::io::stdout().lock();
        if view.message_id != self.message_id {
            self.message_id.clone_from(&view.message_id);
            self.printed.clear();
            if view.message_id.is_some() {
                let _ = write!(out, "\n{}: ", persona.display_name());
            }
        }
        if let Some(rest) = view.text.strip_prefix(self.printed.as_str()) {
            let _ = write!(out, "{rest}");
        } else {
            // content was replaced; start the line over
            let _ = write!(out, "\n{}: {}", persona.display_name(), view.text);
        }
        self.printed.clone_from(&view.text);
        let _ = out.flush();
    }
}

fn build_backend(args: &Args, config: &sass_core::SassConfig) -> anyhow::Result<Arc<dyn ChatBackend>> {
    if args.offline {
        let provider = Arc::new(ScriptedBackend::offline());
        return Ok(Arc::new(PersonaBackend::new(
            provider,
            config.personas.clone(),
            config.provider.model.clone(),
        )));
    }
    if let Some(url) = &args.server {
        let timeout = Duration::from_secs(config.provider.request_timeout_secs);
        return Ok(Arc::new(RelayClient::new(url.clone(), timeout)?));
    }
    if config.provider.usable_api_key().is_none() {
        anyhow::bail!(
            "OPENAI_API_KEY is missing or invalid. Set it, or use --server <url> or --offline."
        );
    }
    let provider = Arc::new(OpenAiBackend::from_config(&config.provider)?);
    Ok(Arc::new(PersonaBackend::new(
        provider,
        config.personas.clone(),
        config.provider.model.clone(),
    )))
}

fn report(event: &ChatEvent) {
    match event {
        ChatEvent::ResponseFailed {
            error, retryable, ..
        } => {
            println!("\n[error: {error}]");
            if *retryable {
                println!("[type /retry to try again]");
            }
        }
        ChatEvent::Interrupted { .. } => println!(" [interrupted]"),
        ChatEvent::TranscriptReset { persona } => {
            println!("\n{} says: {}", persona.display_name(), persona.tagline());
        }
        ChatEvent::MessageAppended { .. }
        | ChatEvent::ResponseStarted { .. }
        | ChatEvent::ResponseCompleted { .. } => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they don't interleave with the typed reply
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = load_config_from_path(args.config.clone().or_else(default_config_path))?;
    ConfigOverrides {
        model: args.model.clone(),
        ..ConfigOverrides::default()
    }
    .apply(&mut config);

    let backend = build_backend(&args, &config)?;
    if !backend.health_check().await {
        eprintln!("[warning: {} backend is not reachable yet]", backend.name());
    }
    let typewriter = Typewriter::new(config.personas.clone());
    let mut view = typewriter.subscribe();
    let (mut chat, mut events) = ChatController::new(
        backend,
        typewriter,
        ControllerConfig {
            persona: args.persona,
            flush_interval: config.streaming.flush_interval(),
            limits: config.limits.clone(),
            event_capacity: config.streaming.channel_capacity,
        },
    );

    println!(
        "{} says: {}\n(/persona <name>, /retry, /stop, /quit)",
        args.persona.display_name(),
        args.persona.tagline()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printer = Printer::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(command) = parse_command(&line) else { continue };
                match command {
                    Command::Quit => break,
                    Command::Retry => {
                        if let Err(e) = chat.retry().await {
                            println!("[{e}]");
                        }
                    }
                    Command::Stop => chat.stop().await,
                    Command::Persona(slug) => match slug.parse::<Persona>() {
                        Ok(persona) => chat.switch_persona(persona).await,
                        Err(e) => {
                            let names: Vec<&str> = Persona::ALL.iter().map(|p| p.slug()).collect();
                            println!("[{e}; choose one of {}]", names.join(", "));
                        }
                    },
                    Command::Say(text) => {
                        if let Err(e) = chat.send(&text).await {
                            println!("[{e}]");
                        }
                    }
                }
            }
            Some(event) = events.recv() => report(&event),
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = view.borrow_and_update().clone();
                printer.render(&snapshot, chat.persona());
            }
        }
    }

    chat.stop().await;
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert!(matches!(parse_command("/quit"), Some(Command::Quit)));
        assert!(matches!(parse_command("  /retry "), Some(Command::Retry)));
        assert!(matches!(
            parse_command("/persona grandma"),
            Some(Command::Persona(slug)) if slug == "grandma"
        ));
        assert!(matches!(parse_command("hello there"), Some(Command::Say(t)) if t == "hello there"));
        assert!(parse_command("   ").is_none());
    }
}
