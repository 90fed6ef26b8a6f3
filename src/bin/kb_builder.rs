use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use wardbot::embedder::EmbeddingClient;
use wardbot::ingestor::{Chunk, IngestConfig, Ingestor};
use wardbot::knowledge::{EmbeddingRecord, KnowledgeBase, SnapshotError};

#[derive(Parser, Debug)]
#[command(
    name = "wardbot-kb",
    about = "Ingests the reference PDF, embeds its chunks, and writes the knowledge-base snapshot"
)]
struct KbCli {
    /// Path to the reference PDF
    #[arg(long, env = "WARDBOT_PDF", default_value = "data/ward_reference.pdf")]
    pdf: PathBuf,

    /// Output path for the knowledge-base snapshot
    #[arg(long, env = "WARDBOT_KB", default_value = "knowledge_base.json")]
    output: PathBuf,

    /// Approximate characters per chunk
    #[arg(long, env = "WARDBOT_CHUNK_CHARS", default_value_t = 500)]
    chunk_chars: usize,

    /// Sentences of overlap carried between adjacent chunks
    #[arg(long, env = "WARDBOT_CHUNK_OVERLAP", default_value_t = 1)]
    overlap_sentences: usize,

    /// Base URL of the OpenAI-compatible embeddings endpoint
    #[arg(
        long,
        env = "WARDBOT_EMBED_BASE",
        default_value = "http://127.0.0.1:1234/v1"
    )]
    embed_base_url: String,

    /// Embedding model identifier recorded in the snapshot
    #[arg(
        long,
        env = "WARDBOT_EMBED_MODEL",
        default_value = "text-embedding-3-small"
    )]
    embed_model: String,

    /// API key for the embeddings endpoint (optional for local servers)
    #[arg(long, env = "OPENAI_API_KEY")]
    embed_api_key: Option<String>,

    /// Max chunks per embedding request
    #[arg(long, env = "WARDBOT_EMBED_BATCH", default_value_t = 32)]
    batch_size: usize,

    /// Seconds before an embedding request times out
    #[arg(long, env = "WARDBOT_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Retry attempts for transient embedding failures
    #[arg(long, env = "WARDBOT_EMBED_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,

    /// Concurrent embedding workers
    #[arg(long, env = "WARDBOT_EMBED_THREADS", default_value_t = 2)]
    worker_threads: usize,

    /// Rebuild even when the existing snapshot matches the source
    #[arg(long, default_value_t = false)]
    force: bool,
}

fn main() -> Result<()> {
    let cli = KbCli::parse();

    let ingestor = Ingestor::new(IngestConfig {
        chunk_target_chars: cli.chunk_chars.max(1),
        overlap_sentences: cli.overlap_sentences,
    });
    eprintln!("ingesting {}...", cli.pdf.display());
    let doc = ingestor
        .ingest(&cli.pdf)
        .context("reference document ingestion failed")?;
    eprintln!(
        "extracted {} chunks (source checksum {:08x}).",
        doc.chunks.len(),
        doc.source_checksum
    );

    if !cli.force {
        match KnowledgeBase::load(&cli.output) {
            Ok(existing)
                if existing.model_id == cli.embed_model
                    && existing.source_checksum == doc.source_checksum =>
            {
                eprintln!(
                    "snapshot {} is up to date ({} chunks); use --force to rebuild.",
                    cli.output.display(),
                    existing.chunk_count()
                );
                return Ok(());
            }
            Ok(_) => eprintln!("existing snapshot is stale; rebuilding."),
            Err(SnapshotError::NotFound) => {}
            Err(err) => eprintln!("existing snapshot unusable ({err}); rebuilding."),
        }
    }

    let client = EmbeddingClient::new(
        &cli.embed_base_url,
        &cli.embed_model,
        cli.embed_api_key.as_deref(),
        Duration::from_secs(cli.timeout_secs.max(1)),
        cli.max_retries.max(1),
        cli.batch_size.max(1),
    )?;

    let vectors = embed_all(&doc.chunks, &client, cli.worker_threads.max(1))?;
    let kb = KnowledgeBase::from_parts(
        cli.embed_model.clone(),
        doc.source_checksum,
        doc.chunks,
        vectors,
    )
    .context("assembled snapshot failed validation")?;

    kb.save(&cli.output)
        .with_context(|| format!("failed to write snapshot {}", cli.output.display()))?;
    eprintln!(
        "snapshot written to {}: {} chunks, {} dimensions, model {}.",
        cli.output.display(),
        kb.chunk_count(),
        kb.dimensions().unwrap_or(0),
        kb.model_id
    );
    Ok(())
}

struct EmbedTask<'a> {
    id: usize,
    chunks: &'a [Chunk],
}

type BatchResult = (usize, Result<Vec<EmbeddingRecord>>);

/// Embeds every chunk through a bounded worker pool, reassembling batches in
/// id order so the output aligns with the chunk sequence.
fn embed_all(
    chunks: &[Chunk],
    client: &EmbeddingClient,
    worker_threads: usize,
) -> Result<Vec<EmbeddingRecord>> {
    let batch_size = client.batch_size();
    let batch_count = chunks.len().div_ceil(batch_size);
    eprintln!(
        "embedding {} chunks in {} batch(es) across {} worker(s)...",
        chunks.len(),
        batch_count,
        worker_threads
    );

    let (task_tx, task_rx) = bounded::<EmbedTask<'_>>(worker_threads * 2);
    let (result_tx, result_rx) = unbounded::<BatchResult>();

    let collected = thread::scope(|scope| {
        for worker_id in 0..worker_threads {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || worker_loop(worker_id, task_rx, result_tx, client));
        }
        drop(task_rx);
        drop(result_tx);

        for (id, batch) in chunks.chunks(batch_size).enumerate() {
            task_tx
                .send(EmbedTask { id, chunks: batch })
                .map_err(|_| anyhow!("embedding worker pool shut down early"))?;
        }
        drop(task_tx);

        let mut collected: BTreeMap<usize, Result<Vec<EmbeddingRecord>>> = BTreeMap::new();
        for (id, outcome) in result_rx.iter() {
            if outcome.is_ok() {
                eprintln!("embedded batch {} of {}.", id + 1, batch_count);
            }
            collected.insert(id, outcome);
        }
        Ok::<_, anyhow::Error>(collected)
    })?;

    let mut vectors = Vec::with_capacity(chunks.len());
    for (id, outcome) in collected {
        let records =
            outcome.with_context(|| format!("embedding batch {} failed", id + 1))?;
        vectors.extend(records);
    }
    anyhow::ensure!(
        vectors.len() == chunks.len(),
        "embedded {} vectors for {} chunks",
        vectors.len(),
        chunks.len()
    );
    Ok(vectors)
}

fn worker_loop(
    worker_id: usize,
    receiver: Receiver<EmbedTask<'_>>,
    sender: Sender<BatchResult>,
    client: &EmbeddingClient,
) {
    for task in receiver.iter() {
        let inputs: Vec<&str> = task.chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        let outcome = client.embed_batch(&inputs).map(|embedded| {
            task.chunks
                .iter()
                .zip(embedded)
                .map(|(chunk, vector)| EmbeddingRecord {
                    chunk_id: chunk.id,
                    vector,
                })
                .collect::<Vec<_>>()
        });
        if outcome.is_err() {
            eprintln!("worker {} failed batch {}.", worker_id, task.id + 1);
        }
        if sender.send((task.id, outcome)).is_err() {
            break;
        }
    }
}
