#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

mod client;
mod index;
mod parser;
mod prompt;

pub use client::{Completion, GigaChat, ModelType};
pub use index::{DocumentIndex, LanguageModel, Payload};
pub use parser::{into_document, Document, Section};
pub use prompt::{
    build_context_prompt, build_prompt, build_prompt_few_shot, extract_answer, Message, Role,
};

use anyhow::Result;
use std::sync::Arc;

/// Answers a free-text question over a folder of documents.
///
/// Builds a fresh index over `dir` with a `GigaChat-Pro` client configured
/// from the environment, then queries it.
///
/// # Errors
///
/// This function will return an error if the directory contains no indexable
/// documents or the GigaChat API returns an error.
pub async fn ask_documents(dir: &str, question: &str) -> Result<String> {
    let giga = GigaChat::from_env()
        .with_model(ModelType::Pro)
        .with_temperature(0.01);

    let index = DocumentIndex::build(dir, Arc::new(giga)).await?;
    index.query(question).await
}
