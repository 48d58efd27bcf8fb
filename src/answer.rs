//! Retrieval-augmented answers.
//!
//! A question is answered in two phases. [`prepare_answer`] validates it,
//! retrieves `retrieval.context_k` chunks, assembles the prompt and opens the
//! chat stream; any failure there is reported before a single byte is sent.
//! [`stream_answer`] then relays tokens. A failure mid-stream cannot change
//! a response that has already started, so it becomes one final line:
//!
//! ```text
//! {"error": "..."}
//! ```

use anyhow::{bail, Result};
use futures::stream::{self, Stream, StreamExt};
use sqlx::SqlitePool;
use std::io::Write;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::llm::{create_chat_provider, ChatMessage, TokenStream};
use crate::search::{search_chunks, ChunkHit, SearchMode};

/// A question with its retrieved context and an open token stream.
pub struct PreparedAnswer {
    pub message_id: String,
    pub context: Vec<ChunkHit>,
    pub tokens: TokenStream,
}

/// Joins retrieved chunk texts into the prompt context, one per line.
pub fn build_context(hits: &[ChunkHit]) -> String {
    hits.iter()
        .map(|h| h.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_messages(system_prompt: &str, context: &str, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(format!(
            "En utilisant le contexte suivant, réponds à la question.\n\nContexte: {}\n\nQuestion: {}\n\nRéponse:",
            context, question
        )),
    ]
}

pub async fn prepare_answer(
    config: &Config,
    pool: &SqlitePool,
    question: &str,
) -> Result<PreparedAnswer> {
    let question = question.trim();
    if question.is_empty() {
        bail!("question must not be empty");
    }
    if !config.llm.is_enabled() {
        bail!("LLM provider is disabled. Set [llm] provider in config.");
    }
    let provider = create_chat_provider(&config.llm)?;

    let mode = SearchMode::for_context(config)?;
    let k = config.retrieval.context_k.max(1) as usize;
    let hits = search_chunks(pool, config, question, mode, k).await?;
    if hits.is_empty() {
        warn!(question, "no context found, answering without sources");
    }

    let messages = build_messages(&config.llm.system_prompt, &build_context(&hits), question);
    let message_id = format!("msg-{}", Uuid::new_v4().simple());
    info!(
        message_id = %message_id,
        model = provider.model_name(),
        mode = mode.as_str(),
        context_chunks = hits.len(),
        "answering question"
    );

    let tokens = provider.stream_chat(&messages).await?;
    Ok(PreparedAnswer {
        message_id,
        context: hits,
        tokens,
    })
}

/// Relays tokens; the first error becomes a final `{"error": ...}` line
/// and ends the stream.
pub fn stream_answer(tokens: TokenStream) -> impl Stream<Item = String> + Send {
    stream::unfold(Some(tokens), |state| async move {
        let mut tokens = state?;
        match tokens.next().await {
            Some(Ok(token)) => Some((token, Some(tokens))),
            Some(Err(e)) => {
                warn!(error = %e, "answer stream failed");
                Some((error_line(&e.to_string()), None))
            }
            None => None,
        }
    })
}

/// `{"error": "..."}` plus a newline, with a space after the colon.
pub fn error_line(message: &str) -> String {
    format!("{{\"error\": {}}}\n", serde_json::Value::from(message))
}

/// `rgpd ask`: prints the answer to stdout as it streams.
pub async fn run_ask(config: &Config, question: &str, show_context: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let prepared = prepare_answer(config, &pool, question).await?;

    if show_context {
        println!("context ({} chunks):", prepared.context.len());
        for (i, hit) in prepared.context.iter().enumerate() {
            println!(
                "  {}. [{:.2}] {}",
                i + 1,
                hit.score,
                hit.text.replace('\n', " ")
            );
        }
        println!();
    }

    let mut answer = Box::pin(stream_answer(prepared.tokens));
    let mut stdout = std::io::stdout();
    while let Some(piece) = answer.next().await {
        stdout.write_all(piece.as_bytes())?;
        stdout.flush()?;
    }
    println!();

    pool.close().await;
    Ok(())
}
