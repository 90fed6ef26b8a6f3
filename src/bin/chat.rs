use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use wardbot::answer::{collect_passages, AnswerEngine, FALLBACK_ANSWER};
use wardbot::embedder::EmbeddingClient;
use wardbot::fluids::{self, FluidPlan, Patient, Scenario};
use wardbot::ingestor::{IngestConfig, Ingestor};
use wardbot::knowledge::{KnowledgeBase, SnapshotError};
use wardbot::llm::{
    BackendKind, ChatProvider, GenerationLimits, LocalProvider, OpenAiProvider, Role,
};
use wardbot::quiz::{self, QuizGenerator, QuizKind, QuizResponse};
use wardbot::retriever::Retriever;
use wardbot::session::{context_excerpt, ChatSession};

#[derive(Parser, Debug)]
#[command(
    name = "wardbot",
    about = "Interactive nursing reference assistant: grounded Q&A, fluid calculator, and quizzes"
)]
struct ChatCli {
    /// Knowledge-base snapshot path
    #[arg(long, env = "WARDBOT_KB", default_value = "knowledge_base.json")]
    kb: PathBuf,

    /// Reference PDF used when the snapshot must be (re)built
    #[arg(long, env = "WARDBOT_PDF", default_value = "data/ward_reference.pdf")]
    pdf: PathBuf,

    /// Approximate characters per chunk for rebuilds
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

    /// Embedding model identifier; must match the snapshot
    #[arg(
        long,
        env = "WARDBOT_EMBED_MODEL",
        default_value = "text-embedding-3-small"
    )]
    embed_model: String,

    /// API key for cloud endpoints (optional for local servers)
    #[arg(long, env = "OPENAI_API_KEY")]
    api_key: Option<String>,

    /// Max chunks per embedding request during rebuilds
    #[arg(long, env = "WARDBOT_EMBED_BATCH", default_value_t = 32)]
    batch_size: usize,

    /// Seconds before an embedding request times out
    #[arg(long, env = "WARDBOT_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    embed_timeout_secs: u64,

    /// Retry attempts for transient embedding failures
    #[arg(long, env = "WARDBOT_EMBED_MAX_RETRIES", default_value_t = 5)]
    embed_max_retries: usize,

    /// Cached query embeddings kept per session (0 disables)
    #[arg(long, env = "WARDBOT_QUERY_CACHE", default_value_t = 256)]
    query_cache_size: usize,

    /// Passages retrieved per question
    #[arg(long, env = "WARDBOT_TOP_K", default_value_t = 4)]
    top_k: usize,

    /// Chat backend to answer with
    #[arg(long, env = "WARDBOT_BACKEND", value_enum, default_value = "local")]
    backend: BackendKind,

    /// Base URL of the local OpenAI-compatible chat server
    #[arg(
        long,
        env = "WARDBOT_CHAT_BASE",
        default_value = "http://127.0.0.1:1234/v1"
    )]
    chat_base_url: String,

    /// Base URL of the cloud chat API
    #[arg(
        long,
        env = "WARDBOT_CLOUD_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    cloud_base_url: String,

    /// Chat model identifier
    #[arg(long, env = "WARDBOT_CHAT_MODEL", default_value = "openhermes")]
    chat_model: String,

    /// Seconds before a chat completion times out
    #[arg(long, env = "WARDBOT_CHAT_TIMEOUT_SECS", default_value_t = 30)]
    chat_timeout_secs: u64,

    /// Sampling temperature for answers
    #[arg(long, default_value_t = 0.7)]
    temperature: f32,

    /// Maximum tokens requested per answer
    #[arg(long, default_value_t = 512)]
    max_completion_tokens: usize,
}

fn main() -> Result<()> {
    let cli = ChatCli::parse();

    let ingestor = Ingestor::new(IngestConfig {
        chunk_target_chars: cli.chunk_chars.max(1),
        overlap_sentences: cli.overlap_sentences,
    });
    let embed_client = EmbeddingClient::new(
        &cli.embed_base_url,
        &cli.embed_model,
        cli.api_key.as_deref(),
        Duration::from_secs(cli.embed_timeout_secs.max(1)),
        cli.embed_max_retries.max(1),
        cli.batch_size.max(1),
    )?;

    let mut kb = load_or_build(&cli, &ingestor, &embed_client)?;
    let retriever = Retriever::for_snapshot(embed_client.clone(), &kb, cli.query_cache_size)
        .map_err(|err| anyhow!(err))
        .context("snapshot/query model identities must match")?
        .with_top_k(cli.top_k);

    let provider = build_provider(&cli)?;
    let engine = AnswerEngine::new(provider);

    let mut session = ChatSession::new();
    println!("wardbot ready: {} chunks loaded. Type :help for commands.", kb.chunk_count());

    loop {
        let Some(line) = prompt_line("you> ")? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match line.as_str() {
            ":quit" | ":exit" | ":q" => break,
            ":help" => print_help(),
            ":status" => print_status(&kb, &engine),
            ":history" => print_history(&session),
            ":clear" => {
                session.clear();
                println!("chat history cleared.");
            }
            ":rebuild" => match rebuild(&cli, &ingestor, &embed_client) {
                Ok(fresh) => {
                    println!("knowledge base rebuilt: {} chunks.", fresh.chunk_count());
                    kb = fresh;
                }
                Err(err) => eprintln!("rebuild failed, keeping current snapshot: {err:#}"),
            },
            _ if line.starts_with(":fluids") => {
                handle_fluids(line.trim_start_matches(":fluids").trim())
            }
            _ if line.starts_with(":quiz") => {
                let requested = line
                    .trim_start_matches(":quiz")
                    .trim()
                    .parse::<usize>()
                    .unwrap_or(6);
                run_quiz(&kb, requested)?;
            }
            _ if line.starts_with(':') => {
                println!("unknown command {line}; type :help for the list.");
            }
            question => handle_question(&kb, &retriever, &engine, &mut session, question),
        }
    }

    println!("goodbye.");
    Ok(())
}

/// Loads the snapshot, or builds one from the PDF when none exists. A
/// malformed snapshot is fatal rather than silently rebuilt over.
fn load_or_build(
    cli: &ChatCli,
    ingestor: &Ingestor,
    client: &EmbeddingClient,
) -> Result<KnowledgeBase> {
    match KnowledgeBase::load(&cli.kb) {
        Ok(kb) => Ok(kb),
        Err(SnapshotError::NotFound) => {
            eprintln!(
                "no snapshot at {}; building from {} (this can take a few minutes)...",
                cli.kb.display(),
                cli.pdf.display()
            );
            rebuild(cli, ingestor, client)
        }
        Err(err) => Err(anyhow!(err)).context("refusing to start on a bad snapshot"),
    }
}

/// Ingests, embeds, and atomically replaces the snapshot. The returned value
/// becomes the live knowledge base only after everything succeeded.
fn rebuild(
    cli: &ChatCli,
    ingestor: &Ingestor,
    client: &EmbeddingClient,
) -> Result<KnowledgeBase> {
    let doc = ingestor
        .ingest(&cli.pdf)
        .context("reference document ingestion failed")?;
    eprintln!("embedding {} chunks...", doc.chunks.len());
    let kb = KnowledgeBase::build(doc, client)?;
    kb.save(&cli.kb)
        .with_context(|| format!("failed to write snapshot {}", cli.kb.display()))?;
    Ok(kb)
}

fn build_provider(cli: &ChatCli) -> Result<Box<dyn ChatProvider>> {
    let limits = GenerationLimits {
        temperature: cli.temperature,
        max_tokens: cli.max_completion_tokens,
    };
    let timeout = Duration::from_secs(cli.chat_timeout_secs.max(1));
    match cli.backend {
        BackendKind::Local => Ok(Box::new(LocalProvider::new(
            &cli.chat_base_url,
            &cli.chat_model,
            timeout,
            limits,
        )?)),
        BackendKind::Cloud => {
            let key = cli
                .api_key
                .as_deref()
                .ok_or_else(|| anyhow!("OPENAI_API_KEY must be set for the cloud backend"))?;
            Ok(Box::new(OpenAiProvider::new(
                &cli.cloud_base_url,
                &cli.chat_model,
                key,
                timeout,
                limits,
            )?))
        }
    }
}

fn handle_question(
    kb: &KnowledgeBase,
    retriever: &Retriever,
    engine: &AnswerEngine,
    session: &mut ChatSession,
    question: &str,
) {
    session.record_user(question);
    let (reply, note) = match retriever.query(kb, question, retriever.top_k()) {
        Ok(result) => {
            let passages = collect_passages(kb, &result);
            let context: String = passages
                .iter()
                .map(|passage| passage.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let reply = engine.answer(question, &passages);
            (reply, context_excerpt(&context, 120))
        }
        Err(err) => {
            eprintln!("retrieval unavailable: {err:#}");
            (FALLBACK_ANSWER.to_string(), None)
        }
    };
    println!("wardbot> {reply}");
    session.record_assistant(reply, note);
}

fn handle_fluids(args: &str) {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    let [weight, age, scenario] = tokens.as_slice() else {
        println!(
            "usage: :fluids <weight-kg> <age-years> <maintenance|resuscitation|mild|moderate|severe|all>"
        );
        return;
    };
    let (Ok(weight), Ok(age)) = (weight.parse::<f64>(), age.parse::<f64>()) else {
        println!("weight and age must be numbers.");
        return;
    };
    let patient = match Patient::new(weight, age) {
        Ok(patient) => patient,
        Err(err) => {
            println!("{err}");
            return;
        }
    };
    if scenario.eq_ignore_ascii_case("all") {
        for (scenario, plan) in fluids::all_scenarios(&patient) {
            print_plan(scenario, &plan);
        }
        return;
    }
    let scenario = match scenario.parse::<Scenario>() {
        Ok(scenario) => scenario,
        Err(err) => {
            println!("{err}");
            return;
        }
    };
    print_plan(scenario, &fluids::plan_for(&patient, scenario));
}

fn print_plan(scenario: Scenario, plan: &FluidPlan) {
    println!("{scenario}:");
    match plan {
        FluidPlan::Maintenance(plan) => {
            println!("  daily:  {} mL/day", round1(plan.ml_per_day));
            println!("  hourly: {} mL/hour", round1(plan.ml_per_hour));
        }
        FluidPlan::Resuscitation(plan) => {
            println!(
                "  bolus:  {} mL, rapid IV; reassess and repeat if needed",
                round1(plan.bolus_ml)
            );
        }
        FluidPlan::Deficit(plan) => {
            println!("  deficit: {} mL over 24 hours", round1(plan.deficit_ml));
            println!(
                "  replacement: {} mL/hour on top of maintenance {} mL/hour",
                round1(plan.replacement_ml_per_hour),
                round1(plan.maintenance.ml_per_hour)
            );
            println!(
                "  combined: {} mL/hour ({} mL/day)",
                round1(plan.total_ml_per_hour),
                round1(plan.total_ml_per_day)
            );
        }
    }
}

fn run_quiz(kb: &KnowledgeBase, requested: usize) -> Result<()> {
    let generator = QuizGenerator::new(&kb.chunks);
    if generator.fact_count() == 0 {
        println!("the knowledge base has no quizzable sentences.");
        return Ok(());
    }
    let items = generator.generate(requested.clamp(1, 20));
    println!(
        "starting quiz: {} question(s). Answer with an option number, free text, or press Enter to skip.",
        items.len()
    );

    let mut responses = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        println!("\nQuestion {} of {}: {}", idx + 1, items.len(), item.prompt);
        for (opt_idx, option) in item.options.iter().enumerate() {
            println!("  {}. {}", opt_idx + 1, option);
        }
        let Some(raw) = prompt_line("answer> ")? else {
            responses.push(None);
            break;
        };
        let raw = raw.trim().to_string();
        let response = if raw.is_empty() {
            None
        } else {
            match item.kind {
                QuizKind::OpenEnded => Some(QuizResponse::Text(raw)),
                _ => match raw.parse::<usize>() {
                    Ok(n) if (1..=item.options.len()).contains(&n) => {
                        Some(QuizResponse::Choice(n - 1))
                    }
                    _ => {
                        println!("(unrecognized option, counted as skipped)");
                        None
                    }
                },
            }
        };
        responses.push(response);
    }

    let report = quiz::grade(&items, &responses);
    println!(
        "\nquiz complete: {}/{} correct ({:.0}%).",
        report.correct,
        report.total,
        report.percent()
    );
    for (idx, entry) in report.entries.iter().enumerate() {
        let mark = if entry.correct { "correct" } else { "incorrect" };
        println!("  {}. {} (expected: {})", idx + 1, mark, entry.expected);
        if !entry.correct && !entry.explanation.is_empty() {
            println!("     {}", entry.explanation);
        }
    }
    Ok(())
}

fn print_status(kb: &KnowledgeBase, engine: &AnswerEngine) {
    println!(
        "knowledge base: {} chunks, {} dimensions, embedding model {}, source checksum {:08x}",
        kb.chunk_count(),
        kb.dimensions().unwrap_or(0),
        kb.model_id,
        kb.source_checksum
    );
    println!("chat backend: {}", engine.describe());
    println!("probing chat endpoint...");
    let report = engine.probe();
    if report.connected {
        println!("  reachable: {}", report.detail);
    } else {
        println!("  unreachable: {}", report.detail);
    }
}

fn print_history(session: &ChatSession) {
    if session.is_empty() {
        println!("no chat history yet.");
        return;
    }
    for turn in session.turns() {
        let speaker = match turn.role {
            Role::User => "you",
            Role::Assistant => "wardbot",
            Role::System => "system",
        };
        println!("{speaker}> {}", turn.text);
        if let Some(note) = &turn.context_note {
            println!("  (context: {note})");
        }
    }
}

fn print_help() {
    println!("commands:");
    println!("  :fluids <weight-kg> <age-years> <scenario>  pediatric fluid calculations");
    println!("      scenarios: maintenance, resuscitation, mild, moderate, severe, or all");
    println!("  :quiz [n]    generate and grade a quiz from the reference material");
    println!("  :status      knowledge-base summary and endpoint probe");
    println!("  :history     show this session's transcript");
    println!("  :clear       forget the transcript");
    println!("  :rebuild     re-ingest the PDF and replace the snapshot");
    println!("  :quit        leave");
    println!("anything else is answered from the reference material.");
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Prints `prompt`, reads one line; `None` on EOF.
fn prompt_line(prompt: &str) -> Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut buf = String::new();
    let read = io::stdin()
        .read_line(&mut buf)
        .context("failed to read stdin")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(buf.trim_end().to_string()))
}
