//! Retrieval-augmented generation building blocks.
//!
//! Chunks are embedded with an [`EmbeddingProvider`] and saved into a
//! [`VectorStore`]; a question is embedded the same way and the closest
//! chunks are rendered into a system message with [`documents_context`].

mod similarity;
mod store;

pub use similarity::cosine_similarity;
pub use store::{MemoryVectorStore, SharedVectorStore, VectorRecord, VectorStore};

use crate::chat::ChatMessage;
use crate::embedding::EmbeddingProvider;
use crate::error::LLMError;

/// Embeds each chunk and saves it into `store`.
///
/// A chunk whose embedding fails is logged and skipped so one bad chunk does
/// not lose the whole batch. Returns the number of records saved.
pub async fn embed_chunks<E, S>(
    embedder: &E,
    store: &mut S,
    chunks: &[impl AsRef<str>],
    model: &str,
) -> Result<usize, LLMError>
where
    E: EmbeddingProvider + ?Sized,
    S: VectorStore + ?Sized,
{
    let mut saved = 0;
    for chunk in chunks {
        let chunk = chunk.as_ref();
        match embedder.embed_one(chunk, model).await {
            Ok(embedding) => {
                store.save(VectorRecord::new(chunk, embedding))?;
                saved += 1;
            }
            Err(e) => log::warn!("skipping chunk, embedding failed: {e}"),
        }
    }
    log::debug!("embedded {saved}/{} chunks", chunks.len());
    Ok(saved)
}

/// Embeds `question` into a query-only record.
pub async fn query_record<E>(
    embedder: &E,
    question: &str,
    model: &str,
) -> Result<VectorRecord, LLMError>
where
    E: EmbeddingProvider + ?Sized,
{
    let embedding = embedder
        .embed_one(question, model)
        .await
        .map_err(|e| match e {
            LLMError::EmbeddingError(_) => e,
            other => LLMError::EmbeddingError(other.to_string()),
        })?;
    Ok(VectorRecord::query(embedding))
}

/// Embeds `question` and returns the closest chunks, best first.
pub async fn retrieve<E, S>(
    embedder: &E,
    store: &S,
    question: &str,
    model: &str,
    min_score: f64,
    max_results: usize,
) -> Result<Vec<VectorRecord>, LLMError>
where
    E: EmbeddingProvider + ?Sized,
    S: VectorStore + ?Sized,
{
    let query = query_record(embedder, question, model).await?;
    let found = store.search_top_n_similarities(&query, min_score, max_results);
    for record in &found {
        log::debug!("similarity {:.4}: {}", record.score, record.text);
    }
    Ok(found)
}

/// Renders retrieved chunks as a documents block for a system prompt.
pub fn documents_context(records: &[VectorRecord]) -> String {
    let mut content = String::from("Documents:\n");
    for record in records {
        content.push_str("<doc>");
        content.push_str(&record.text);
        content.push_str("</doc>\n");
    }
    content
}

/// Builds the messages of a RAG prompt: instructions, retrieved documents,
/// then the question.
pub fn rag_messages(
    instructions: &str,
    records: &[VectorRecord],
    question: &str,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system().content(instructions).build(),
        ChatMessage::system().content(documents_context(records)).build(),
        ChatMessage::user().content(question).build(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatRole;

    #[test]
    fn documents_are_wrapped_in_doc_tags() {
        let records = vec![
            VectorRecord::new("The frogs swim in the pond", vec![]),
            VectorRecord::new("The fish swim in the sea", vec![]),
        ];
        assert_eq!(
            documents_context(&records),
            "Documents:\n<doc>The frogs swim in the pond</doc>\n<doc>The fish swim in the sea</doc>\n"
        );
    }

    #[test]
    fn rag_messages_put_the_question_last() {
        let messages = rag_messages("You are an animal expert.", &[], "Which animals swim?");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1].content, "Documents:\n");
        assert_eq!(messages[2].role, ChatRole::User);
    }
}
