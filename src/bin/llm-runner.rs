use std::io::{self, IsTerminal, Read, Write};
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::*;
use futures::StreamExt;
use llm_runner::agent::{AgentBuilder, CancellationToken, ToolLoopOutcome};
#[cfg(feature = "mcp")]
use llm_runner::agent::McpToolkit;
use llm_runner::builder::{FunctionBuilder, LLMBackend, LLMBuilder, ParamBuilder};
use llm_runner::chat::{ChatMessage, ChatProvider, ChatStream};
use llm_runner::embedding::EmbeddingProvider;
use llm_runner::config::RunnerConfig;
use llm_runner::error::LLMError;
use llm_runner::rag::{self, cosine_similarity, MemoryVectorStore};
use llm_runner::tools::FunctionRegistry;
use llm_runner::LLMProvider;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde::Deserialize;
use spinners::{Spinner, Spinners};

/// Chat, tools, embeddings and RAG against a local model runner
#[derive(Parser)]
#[clap(name = "llm-runner", version)]
struct CliArgs {
    #[command(flatten)]
    options: GlobalOptions,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalOptions {
    /// Model runner backend (model-runner, ollama)
    #[arg(long, global = true, default_value = "model-runner")]
    backend: String,

    /// OpenAI-compatible base URL, overrides MODEL_RUNNER_BASE_URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Chat model
    #[arg(long, global = true)]
    chat_model: Option<String>,

    /// Tool-detection model
    #[arg(long, global = true)]
    tools_model: Option<String>,

    /// Embeddings model
    #[arg(long, global = true)]
    embeddings_model: Option<String>,

    /// Temperature of the final answer
    #[arg(long, global = true)]
    temperature: Option<f32>,

    /// Length limit of the final answer, in tokens
    #[arg(long, global = true)]
    max_tokens: Option<u32>,

    /// System prompt
    #[arg(long, global = true)]
    system: Option<String>,

    /// Abort after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Chat with the model, interactively when no prompt is given
    Chat {
        /// Prompt; read from stdin when piped
        prompt: Option<String>,
    },
    /// Cosine similarity between the first text and each of the others
    Similarity {
        /// Reference text
        reference: String,
        /// Texts compared with the reference
        #[arg(required = true)]
        others: Vec<String>,
    },
    /// Answer questions from a set of documents
    Rag {
        /// Question; interactive when omitted
        question: Option<String>,
        /// Markdown file whose blank-line separated blocks are the chunks
        #[arg(long)]
        file: Option<std::path::PathBuf>,
        /// Minimum similarity of a retrieved chunk
        #[arg(long)]
        min_similarity: Option<f64>,
        /// Maximum number of retrieved chunks
        #[arg(long)]
        max_results: Option<usize>,
    },
    /// Run local tools chosen by the model, then answer
    Tools {
        prompt: String,
        /// Maximum number of tool-detection passes
        #[arg(long)]
        max_passes: Option<usize>,
        /// Run the tool calls of a pass concurrently
        #[arg(long)]
        concurrent: bool,
    },
    /// Run tools of an MCP server chosen by the model, then answer
    #[cfg(feature = "mcp")]
    Agent {
        prompt: String,
        /// Streamable HTTP endpoint of the MCP server
        #[arg(long, default_value = "http://localhost:9011/mcp")]
        mcp_url: String,
        /// Spawn this command and talk MCP over its stdio instead,
        /// e.g. `--mcp-command socat STDIO TCP:host.docker.internal:8811`
        #[arg(long, num_args = 1.., allow_hyphen_values = true, conflicts_with = "mcp_url")]
        mcp_command: Vec<String>,
        /// Only expose these tools to the model
        #[arg(long = "only")]
        only: Vec<String>,
        /// Maximum number of tool-detection passes
        #[arg(long)]
        max_passes: Option<usize>,
    },
}

const AVENGERS_CHUNKS: [&str; 5] = [
    "# The Avengers\n\"The Avengers\" is a classic British spy-fi television series that aired from 1961 to 1969. \
     The series follows secret agents working for a specialized branch of British intelligence, \
     battling eccentric villains and foiling bizarre plots to undermine national security.",
    "# John Steed\nJohn Steed, portrayed by Patrick Macnee, is the quintessential English gentleman spy \
     who never leaves home without his trademark bowler hat and umbrella (which conceals various weapons).",
    "# Emma Peel\nEmma Peel, played by Diana Rigg, is perhaps the most iconic of Steed's partners. \
     A brilliant scientist, martial arts expert, and fashion icon, Mrs. Peel combines beauty, brains, \
     and remarkable fighting skills.",
    "# Tara King\nTara King, played by Linda Thorson, was Steed's final regular partner in the original series. \
     Younger and somewhat less experienced than her predecessors, King was nevertheless a trained agent.",
    "# Mother\nMother, portrayed by Patrick Newell, is Steed's wheelchair-bound superior who appears in later seasons. \
     Operating from various unusual locations, this eccentric spymaster directs operations.",
];

const RAG_INSTRUCTIONS: &str =
    "You are a useful AI agent expert with TV series. Use only the following documents to answer:";

const TOOLS_INSTRUCTIONS: &str = "You are a useful AI agent. \
    Your job is to understand the user prompt and decide if you need to use tools to run external commands. \
    Ignore all things not related to the usage of a tool.";

fn separator() {
    println!("{}", "─".repeat(50).bright_black());
}

fn load_config(options: &GlobalOptions) -> Result<RunnerConfig, LLMError> {
    let mut config = RunnerConfig::from_env()?;
    if let Some(url) = &options.base_url {
        config.base_url = url.clone();
    }
    if let Some(model) = &options.chat_model {
        config.chat_model = model.clone();
        if options.tools_model.is_none() {
            config.tools_model = model.clone();
        }
    }
    if let Some(model) = &options.tools_model {
        config.tools_model = model.clone();
    }
    if let Some(model) = &options.embeddings_model {
        config.embeddings_model = model.clone();
    }
    if let Some(temperature) = options.temperature {
        config.temperature = temperature;
    }
    if options.max_tokens.is_some() {
        config.max_tokens = options.max_tokens;
    }
    Ok(config)
}

fn llm_builder(options: &GlobalOptions, config: &RunnerConfig) -> Result<LLMBuilder, LLMError> {
    let backend = LLMBackend::from_str(&options.backend)?;
    let mut builder = LLMBuilder::from_config(config).backend(backend);
    if let Some(system) = &options.system {
        builder = builder.system(system);
    }
    Ok(builder)
}

/// Cancels on Ctrl-C and, when set, after the timeout.
fn cancellation(options: &GlobalOptions) -> CancellationToken {
    let token = match options.timeout {
        Some(seconds) => CancellationToken::with_timeout(Duration::from_secs(seconds)),
        None => CancellationToken::new(),
    };
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    token
}

/// Prints fragments as they arrive and returns the whole text.
async fn print_stream(
    mut stream: ChatStream,
    mut spinner: Option<Spinner>,
) -> Result<String, LLMError> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        stop(spinner.take());
        let fragment = fragment?;
        print!("{fragment}");
        let _ = io::stdout().flush();
        text.push_str(&fragment);
    }
    stop(spinner);
    println!();
    Ok(text)
}

fn stop(spinner: Option<Spinner>) {
    if let Some(mut sp) = spinner {
        sp.stop();
        print!("\r\x1B[K");
    }
}

fn thinking(message: &str) -> Option<Spinner> {
    io::stdout()
        .is_terminal()
        .then(|| Spinner::new(Spinners::Dots12, message.bright_magenta().to_string()))
}

fn print_outcome(outcome: &ToolLoopOutcome) {
    for execution in &outcome.executions {
        println!(
            "{} {} {}",
            "✓".bright_green(),
            execution.call.to_string().bright_black(),
            execution.output
        );
    }
    for failure in &outcome.failures {
        println!("{} {}", "✗".bright_red(), failure.error);
    }
    println!(
        "{}",
        format!("{} pass(es), stopped on {:?}", outcome.passes, outcome.stop).bright_black()
    );
    separator();
}

async fn chat(
    provider: &dyn LLMProvider,
    config: &RunnerConfig,
    prompt: Option<String>,
    cancel: &CancellationToken,
) -> Result<(), LLMError> {
    let params = config.chat_params();
    let prompt = match prompt {
        Some(prompt) => Some(prompt),
        None if !io::stdin().is_terminal() => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .map_err(|e| LLMError::Generic(e.to_string()))?;
            Some(input)
        }
        None => None,
    };
    if let Some(prompt) = prompt {
        let messages = [ChatMessage::user().content(prompt).build()];
        let stream = cancel.run(provider.chat_stream(&messages, &params)).await??;
        print_stream(cancel.guard(stream), None).await?;
        return Ok(());
    }

    println!("{}", "llm-runner - Interactive Chat".bright_cyan());
    println!("Model: {}", config.chat_model.bright_green());
    println!("{}", "Type 'exit' to quit".bright_black());
    separator();

    let mut rl = DefaultEditor::new().map_err(|e| LLMError::Generic(e.to_string()))?;
    let mut messages: Vec<ChatMessage> = Vec::new();
    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("exit") {
                    println!("{}", "👋 Goodbye!".bright_cyan());
                    break;
                }
                let _ = rl.add_history_entry(trimmed);
                messages.push(ChatMessage::user().content(trimmed).build());

                let spinner = thinking("Thinking...");
                let answer = match cancel.run(provider.chat_stream(&messages, &params)).await? {
                    Ok(stream) => print_stream(cancel.guard(stream), spinner).await,
                    Err(e) => Err(e),
                };
                match answer {
                    Ok(text) => messages.push(ChatMessage::assistant().content(text).build()),
                    Err(LLMError::Cancelled) => return Err(LLMError::Cancelled),
                    Err(e) => eprintln!("{} {e}", "Error:".bright_red()),
                }
                separator();
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("\n{}", "👋 Goodbye!".bright_cyan());
                break;
            }
            Err(err) => {
                eprintln!("{} {err:?}", "Error:".bright_red());
                break;
            }
        }
    }
    Ok(())
}

async fn similarity(
    provider: &dyn LLMProvider,
    config: &RunnerConfig,
    reference: String,
    others: Vec<String>,
    cancel: &CancellationToken,
) -> Result<(), LLMError> {
    let mut input = vec![reference];
    input.extend(others);
    let embeddings = cancel
        .run(provider.embed(input.clone(), &config.embeddings_model))
        .await??;
    let (reference, others) = embeddings
        .split_first()
        .ok_or_else(|| LLMError::EmbeddingError("no embeddings returned".to_string()))?;
    println!("{} {}", "Reference:".bright_cyan(), input[0]);
    for (text, embedding) in input[1..].iter().zip(others) {
        println!(
            "{} {}",
            format!("{:.4}", cosine_similarity(reference, embedding)).bright_green(),
            text
        );
    }
    Ok(())
}

fn read_chunks(file: Option<&std::path::Path>) -> Result<Vec<String>, LLMError> {
    let Some(path) = file else {
        return Ok(AVENGERS_CHUNKS.iter().map(|c| c.to_string()).collect());
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| LLMError::InvalidRequest(format!("cannot read {}: {e}", path.display())))?;
    Ok(content
        .split("\n\n")
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_string)
        .collect())
}

async fn rag_answer(
    provider: &dyn LLMProvider,
    config: &RunnerConfig,
    store: &MemoryVectorStore,
    question: &str,
    cancel: &CancellationToken,
) -> Result<String, LLMError> {
    let spinner = thinking("Searching...");
    let streamed = async {
        let found = cancel
            .run(rag::retrieve(
                provider,
                store,
                question,
                &config.embeddings_model,
                config.min_similarity,
                config.max_results,
            ))
            .await??;
        for record in &found {
            let title = record.text.lines().next().unwrap_or_default();
            log::info!("retrieved {:.4} {title}", record.score);
        }
        let messages = rag::rag_messages(RAG_INSTRUCTIONS, &found, question);
        let stream = cancel
            .run(provider.chat_stream(&messages, &config.chat_params()))
            .await??;
        Ok::<_, LLMError>(stream)
    }
    .await;
    let stream = match streamed {
        Ok(stream) => stream,
        Err(e) => {
            stop(spinner);
            return Err(e);
        }
    };
    print_stream(cancel.guard(stream), spinner).await
}

async fn rag_chat(
    provider: &dyn LLMProvider,
    config: &RunnerConfig,
    question: Option<String>,
    file: Option<std::path::PathBuf>,
    cancel: &CancellationToken,
) -> Result<(), LLMError> {
    let chunks = read_chunks(file.as_deref())?;
    let mut store = MemoryVectorStore::new();
    let spinner = thinking("Creating the embeddings...");
    let saved = cancel
        .run(rag::embed_chunks(provider, &mut store, &chunks, &config.embeddings_model))
        .await??;
    stop(spinner);
    println!("{} {saved} chunk(s) embedded", "✋".bright_cyan());
    separator();

    if let Some(question) = question {
        rag_answer(provider, config, &store, &question, cancel).await?;
        return Ok(());
    }

    let mut rl = DefaultEditor::new().map_err(|e| LLMError::Generic(e.to_string()))?;
    loop {
        match rl.readline("🤖 ask me something> ") {
            Ok(line) => {
                let question = line.trim();
                if question.is_empty() || question.eq_ignore_ascii_case("exit") {
                    break;
                }
                let _ = rl.add_history_entry(question);
                match rag_answer(provider, config, &store, question, cancel).await {
                    Err(LLMError::Cancelled) => return Err(LLMError::Cancelled),
                    Err(e) => eprintln!("{} {e}", "Error:".bright_red()),
                    Ok(_) => {}
                }
                separator();
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{} {err:?}", "Error:".bright_red());
                break;
            }
        }
    }
    println!("{}", "👋 Goodbye!".bright_cyan());
    Ok(())
}

#[derive(Deserialize)]
struct Person {
    name: String,
}

fn local_tools() -> FunctionRegistry {
    let person = |name: &str, description: &str| {
        FunctionBuilder::new(name)
            .description(description)
            .param(ParamBuilder::new("name").description("The name of the person"))
            .required(vec!["name".to_string()])
            .build()
    };
    FunctionRegistry::new()
        .register_typed(
            person("say_hello", "Say hello to the given person name"),
            |p: Person| Ok(format!("👋 Hello {}", p.name)),
        )
        .register_typed(
            person("vulcan_salute", "Give a vulcan salute to the given person name"),
            |p: Person| Ok(format!("🖖 Live long and prosper {}", p.name)),
        )
}

async fn run_agent(
    builder: AgentBuilder,
    prompt: &str,
    cancel: &CancellationToken,
) -> Result<(), LLMError> {
    let agent = builder.instructions(TOOLS_INSTRUCTIONS).build()?;
    let spinner = thinking("Detecting tool calls...");
    let asked = agent.ask(prompt, cancel).await;
    stop(spinner);
    let (outcome, stream) = asked?;
    print_outcome(&outcome);
    print_stream(stream, None).await?;
    Ok(())
}

async fn run(args: CliArgs) -> Result<(), LLMError> {
    let mut config = load_config(&args.options)?;
    let cancel = cancellation(&args.options);
    let builder = llm_builder(&args.options, &config)?;

    match args.command {
        Command::Chat { prompt } => {
            let provider = builder.build()?;
            chat(provider.as_ref(), &config, prompt, &cancel).await
        }
        Command::Similarity { reference, others } => {
            let provider = builder.build()?;
            similarity(provider.as_ref(), &config, reference, others, &cancel).await
        }
        Command::Rag {
            question,
            file,
            min_similarity,
            max_results,
        } => {
            if let Some(min) = min_similarity {
                config.min_similarity = min;
            }
            if let Some(max) = max_results {
                config.max_results = max;
            }
            config.validate()?;
            let provider = builder.build()?;
            rag_chat(provider.as_ref(), &config, question, file, &cancel).await
        }
        Command::Tools {
            prompt,
            max_passes,
            concurrent,
        } => {
            if let Some(max) = max_passes {
                config.max_passes = max;
            }
            config.concurrent_tool_calls = concurrent;
            let agent = AgentBuilder::new()
                .config(config)
                .llm(builder)
                .tools(local_tools());
            run_agent(agent, &prompt, &cancel).await
        }
        #[cfg(feature = "mcp")]
        Command::Agent {
            prompt,
            mcp_url,
            mcp_command,
            only,
            max_passes,
        } => {
            if let Some(max) = max_passes {
                config.max_passes = max;
            }
            let mut toolkit = match mcp_command.split_first() {
                Some((program, args)) => {
                    cancel
                        .run(McpToolkit::connect_command(program, args.iter().cloned()))
                        .await??
                }
                None => cancel.run(McpToolkit::connect(mcp_url)).await??,
            };
            if !only.is_empty() {
                toolkit = toolkit.only(only);
            }
            let agent = AgentBuilder::new()
                .config(config)
                .llm(builder)
                .tools(toolkit);
            run_agent(agent, &prompt, &cancel).await
        }
    }
}

#[tokio::main]
async fn main() {
    llm_runner::init_logging();
    let args = CliArgs::parse();
    if let Err(e) = run(args).await {
        eprintln!("{} {e}", "Error:".bright_red());
        std::process::exit(1);
    }
}
