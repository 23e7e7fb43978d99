//! finq command-line interface
//!
//! # Usage
//!
//! ```bash
//! export OPENAI_API_KEY=...
//! export FINNHUB_API_KEY=...   # optional, Yahoo Finance is used without a key
//!
//! finq ask "compare AAPL vs MSFT"
//! finq --agent chat
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use finq_engine::{EngineConfig, QueryAnswer, QueryEngine, new_conversation_id};
use finq_utils::AppConfig;
use std::io::{self, BufRead, Write};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "finq")]
#[command(about = "Ask questions about stocks, markets and portfolios", long_about = None)]
struct Args {
    /// Let the model call tools (agent loop)
    #[arg(long, global = true)]
    agent: bool,

    /// Give up on a question after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    deadline_secs: Option<u64>,

    /// Print the full answer as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print provider health after each answer
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask one question
    Ask {
        /// Question text
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Interactive conversation
    Chat,
}

fn deadline(args: &Args) -> Option<Instant> {
    args.deadline_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs))
}

fn print_answer(engine: &QueryEngine, args: &Args, answer: &QueryAnswer) -> anyhow::Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(answer)?);
    } else {
        println!("{}\n", answer.answer);
        let via = answer.model.as_deref().unwrap_or(answer.source.as_str());
        println!("[{via}, {} facts]", answer.used_facts.len());
    }

    if args.verbose {
        println!("\nProvider health:");
        for snapshot in engine.health_snapshots() {
            println!(
                "  {:<32} {:?} ({} consecutive failures)",
                snapshot.provider, snapshot.state, snapshot.consecutive_failures
            );
        }
    }
    println!();
    Ok(())
}

async fn chat(engine: &QueryEngine, args: &Args) -> anyhow::Result<()> {
    println!("finq chat. Ask about stocks, /new starts over, /exit quits.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut conversation = new_conversation_id();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            println!();
            break;
        }

        match input.trim() {
            "" => {}
            "/exit" | "/quit" => break,
            "/new" => {
                engine.end_conversation(&conversation);
                conversation = new_conversation_id();
                println!("Started a new conversation.\n");
            }
            question => {
                let answer = engine.handle_query(question, &conversation, deadline(args)).await;
                print_answer(engine, args, &answer)?;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let app = AppConfig::from_env();
    if app.is_production() {
        finq_utils::init_tracing_json();
    } else if args.verbose {
        finq_utils::init_tracing();
    } else {
        // keep the terminal readable unless RUST_LOG says otherwise
        finq_utils::init_tracing_with_default("warn");
    }

    let mut config = EngineConfig::from_env().context("invalid configuration")?;
    config.agent_mode |= args.agent;
    let engine = QueryEngine::builder(config)
        .build()
        .context("failed to start the query engine")?;
    info!(models = ?engine.models(), "Starting finq");

    match &args.command {
        Command::Ask { text } => {
            let question = text.join(" ");
            let answer = engine
                .handle_query(&question, &new_conversation_id(), deadline(&args))
                .await;
            print_answer(&engine, &args, &answer)?;
        }
        Command::Chat => chat(&engine, &args).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ask() {
        let args = Args::parse_from(["finq", "--json", "ask", "compare", "AAPL", "vs", "MSFT"]);
        assert!(args.json);
        assert!(matches!(args.command, Command::Ask { ref text } if text.join(" ") == "compare AAPL vs MSFT"));
    }

    #[test]
    fn test_parse_chat_flags() {
        let args = Args::parse_from(["finq", "chat", "--agent", "--deadline-secs", "30", "-v"]);
        assert!(args.agent && args.verbose);
        assert_eq!(args.deadline_secs, Some(30));
        assert!(matches!(args.command, Command::Chat));
    }
}
