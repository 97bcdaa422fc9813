use std::{
    cmp::Ordering,
    fs::{self, DirEntry},
    path::Path,
    sync::Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future;
use tracing::debug;

use crate::{
    client::Completion,
    parser::{self, Document},
    prompt::{self, Message},
};

/// How many of the best-matching sections are handed to the model as context.
const TOP_K: usize = 4;

/// The seam between the index and the hosted model, so retrieval can be
/// exercised against a deterministic in-process implementation.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Sends a sequence of role-tagged messages and returns the completion.
    async fn chat(&self, messages: &[Message]) -> Result<Completion>;

    /// Embeds a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// An indexed document section, returned as retrieval context.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Payload {
    pub text: String,
    pub path: String,
    pub title: String,
    pub page_title: String,
}

struct IndexEntry {
    vector: Vec<f32>,
    payload: Payload,
}

/// An in-memory retrieval index over a folder of documents.
///
/// Built once at construction: every file under the folder is parsed into
/// sections and each section is embedded through the configured model.
/// Queries embed the question, rank sections by cosine similarity and ask
/// the model to answer from the best matches.
pub struct DocumentIndex {
    model: Arc<dyn LanguageModel>,
    entries: Vec<IndexEntry>,
}

impl DocumentIndex {
    /// Builds an index over every document under `dir`.
    ///
    /// Files that cannot be parsed as text are skipped.
    ///
    /// # Errors
    ///
    /// This function will return an error if the directory cannot be read,
    /// no document yields an indexable section, or the embeddings API
    /// returns an error.
    pub async fn build(dir: impl AsRef<Path>, model: Arc<dyn LanguageModel>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut documents = Vec::new();

        for file in read_dir_recursive(dir)? {
            match parser::into_document(&file.path(), dir) {
                Ok(document) => documents.push(document),
                Err(err) => debug!("Skipping {}: {err}", file.path().display()),
            }
        }

        let embedded = future::join_all(documents.iter().map(|document| {
            let model = Arc::clone(&model);
            async move {
                let texts = document
                    .sections
                    .iter()
                    .map(|section| section.content.clone())
                    .collect::<Vec<String>>();

                model.embed(&texts).await
            }
        }))
        .await;

        let mut entries = Vec::new();

        for (document, vectors) in documents.iter().zip(embedded) {
            let vectors = vectors?;

            if vectors.len() != document.sections.len() {
                return Err(anyhow!(
                    "Expected {} embeddings for {}, got {}",
                    document.sections.len(),
                    document.path,
                    vectors.len()
                ));
            }

            for (section, vector) in document.sections.iter().zip(vectors) {
                entries.push(IndexEntry {
                    vector,
                    payload: Payload {
                        text: section.content.clone(),
                        path: document.path.clone(),
                        title: section.title.clone().unwrap_or_default(),
                        page_title: document.title.clone(),
                    },
                });
            }
        }

        if entries.is_empty() {
            return Err(anyhow!(
                "No indexable documents under {}",
                dir.display()
            ));
        }

        debug!(
            "Indexed {} sections from {} documents",
            entries.len(),
            documents.len()
        );

        Ok(Self { model, entries })
    }

    /// Answers a free-text question from the indexed documents.
    ///
    /// # Errors
    ///
    /// This function will return an error if the embeddings or completions
    /// API returns an error.
    pub async fn query(&self, question: &str) -> Result<String> {
        let query_vector = self
            .model
            .embed(&[question.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Could not find embedding"))?;

        let sources = self.search(&query_vector, TOP_K);
        debug!("Retrieved {} sections for {question:?}", sources.len());

        let completion = self
            .model
            .chat(&prompt::build_context_prompt(question, &sources))
            .await?;

        Ok(completion.content)
    }

    /// Returns the `count` sections closest to `vector`, best first.
    #[must_use]
    pub fn search(&self, vector: &[f32], count: usize) -> Vec<Payload> {
        let mut scored = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(vector, &entry.vector), &entry.payload))
            .collect::<Vec<(f32, &Payload)>>();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        scored
            .into_iter()
            .take(count)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

fn read_dir_recursive(path: impl AsRef<Path>) -> Result<Vec<DirEntry>> {
    let files = fs::read_dir(path)?.collect::<Result<Vec<DirEntry>, std::io::Error>>()?;

    Ok(files
        .into_iter()
        .flat_map(|entry| {
            if entry.path().is_dir() {
                read_dir_recursive(entry.path())
            } else {
                Ok(vec![entry])
            }
        })
        .flatten()
        .collect())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot = a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|y| y * y).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    struct MockModel;

    #[async_trait]
    impl LanguageModel for MockModel {
        async fn chat(&self, messages: &[Message]) -> Result<Completion> {
            // Echo the final user message so assertions can see the question.
            Ok(Completion {
                content: messages
                    .last()
                    .map(|message| message.content.clone())
                    .unwrap_or_default(),
            })
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|text| letter_histogram(text)).collect())
        }
    }

    fn letter_histogram(text: &str) -> Vec<f32> {
        let mut histogram = vec![0.0f32; 26];

        for ch in text.to_ascii_lowercase().chars() {
            if ch.is_ascii_lowercase() {
                histogram[(ch as usize) - ('a' as usize)] += 1.0;
            }
        }

        histogram
    }

    #[test]
    fn should_score_identical_vectors_highest() {
        // When
        let same = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        let orthogonal = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);

        // Then
        assert!((same - 1.0).abs() < 1e-6);
        assert!(orthogonal.abs() < 1e-6);
    }

    #[test]
    fn should_score_degenerate_vectors_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn should_index_sections_from_a_directory() {
        // Given
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("cats.md"), "# Cats\nCats purr and nap.").unwrap();
        fs::write(dir.path().join("rust.md"), "# Rust\nRust has ownership.").unwrap();

        // When
        let index = DocumentIndex::build(dir.path(), Arc::new(MockModel))
            .await
            .unwrap();

        // Then
        assert_eq!(index.entries.len(), 2);
    }

    #[tokio::test]
    async fn should_retrieve_the_closest_section() {
        // Given
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("cats.md"), "# Cats\nCats purr and nap.").unwrap();
        fs::write(dir.path().join("rust.md"), "# Rust\nRust has ownership.").unwrap();

        let index = DocumentIndex::build(dir.path(), Arc::new(MockModel))
            .await
            .unwrap();

        // When
        let results = index.search(&letter_histogram("Do cats purr?"), 1);

        // Then
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].page_title, "Cats");
    }

    #[tokio::test]
    async fn should_answer_queries_non_empty() {
        // Given
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("cats.md"), "# Cats\nCats purr and nap.").unwrap();

        let index = DocumentIndex::build(dir.path(), Arc::new(MockModel))
            .await
            .unwrap();

        // When
        let answer = index.query("What do cats do?").await.unwrap();

        // Then
        assert!(!answer.is_empty());
    }

    #[tokio::test]
    async fn should_reject_an_empty_directory() {
        // Given
        let dir = tempdir().unwrap();

        // When
        let result = DocumentIndex::build(dir.path(), Arc::new(MockModel)).await;

        // Then
        assert!(result.is_err());
    }
}
