#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::{fs, process};
use tracing::debug;
use tracing_subscriber::{
    prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use gigachat::{ask_documents, build_prompt, build_prompt_few_shot, extract_answer, GigaChat};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send a single message to the model.
    Chat { message: String },
    /// Count the even digits of a number with a few-shot prompt.
    FewShot { number: String },
    /// Answer a question over a folder of documents.
    Ask { dir: String, question: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "cli=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Chat { message } => {
            let giga = GigaChat::from_env();
            let completion = giga.chat(&build_prompt(&message)).await?;

            println!("{}", completion.content);
        }
        Commands::FewShot { number } => {
            let giga = GigaChat::from_env();
            let completion = giga.chat(&build_prompt_few_shot(&number)).await?;

            println!("{}", extract_answer(&completion.content));
        }
        Commands::Ask { dir, question } => {
            if fs::metadata(&dir).is_err() {
                eprintln!("Error: Directory does not exist");
                process::exit(1);
            }

            debug!("Indexing {dir}");

            println!("{}", ask_documents(&dir, &question).await?);
        }
    }

    Ok(())
}
