use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use russo::{
    cache::{AudioCache, CachedSynthesizer, DEFAULT_CACHE_DIR},
    eval::{filter_scenarios, load_scenarios, BatchOutcome, SingleRunResult},
    parsers::{extract_path, JsonResponseParser},
    providers::{
        HttpAgent, HttpAgentConfig, OpenAiSynthesizer, TextSynthesizer, WebSocketAgent,
        WebSocketAgentConfig,
    },
    Agent, Pipeline, RussoError, Synthesizer,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_FAILED: i32 = 1;
const EXIT_NO_SCENARIOS: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "russo")]
#[command(about = "Check a voice agent's tool calls against scenario files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run scenarios against an HTTP or WebSocket agent
    Run(RunArgs),
    /// Inspect or clear the synthesized audio cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Print the number of cached entries
    Size(CacheArgs),
    /// Delete every cached entry
    Clear(CacheArgs),
}

#[derive(Args)]
struct CacheArgs {
    #[arg(long, default_value = DEFAULT_CACHE_DIR)]
    cache_dir: PathBuf,
}

#[derive(Debug, Clone, ValueEnum)]
enum SynthesizerKind {
    /// OpenAI-compatible TTS (reads OPENAI_* environment variables)
    Openai,
    /// Send the prompt text itself as the audio payload
    Text,
}

#[derive(Args)]
struct RunArgs {
    /// Scenario file or directory (YAML/JSON)
    #[arg(long, default_value = "scenarios")]
    scenarios: PathBuf,

    /// Endpoint that receives `{"audio": <base64>, "format": ...}`; a
    /// `ws://` URL talks to the agent over a WebSocket
    #[arg(long)]
    agent_url: String,

    /// WebSocket only: keep reading replies until one has this dot path
    /// (default: stop after the first reply)
    #[arg(long)]
    ws_complete_key: Option<String>,

    #[arg(long, value_enum, default_value = "openai")]
    synthesizer: SynthesizerKind,

    /// Override every scenario's runs per prompt
    #[arg(long)]
    runs: Option<usize>,

    /// Override every scenario's concurrency bound
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Run only scenarios whose name contains this substring (repeatable)
    #[arg(long)]
    filter: Vec<String>,

    /// Output path for JSONL results
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_CACHE_DIR)]
    cache_dir: PathBuf,

    #[arg(long)]
    no_cache: bool,

    /// Dot path to the tool calls in the agent's JSON reply
    #[arg(long, default_value = "tool_calls")]
    tool_calls_key: String,

    #[arg(long, default_value_t = 60_000)]
    timeout_ms: u64,
}

#[derive(Serialize)]
struct ScenarioRecord<'a> {
    scenario: &'a str,
    passed: bool,
    pass_rate: f64,
    match_rate: f64,
    runs: &'a [SingleRunResult],
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn default_out_path() -> PathBuf {
    let ts = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    PathBuf::from(format!("russo-runs/{ts}.jsonl"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,russo=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run(args) => run(args).await?,
        Command::Cache(CacheCommand::Size(args)) => {
            let cache = AudioCache::new(args.cache_dir);
            let size = cache.size().await?;
            println!("{size} cached entries in {}", cache.cache_dir().display());
            0
        }
        Command::Cache(CacheCommand::Clear(args)) => {
            let cache = AudioCache::new(args.cache_dir);
            let removed = cache.clear().await?;
            println!("removed {removed} files from {}", cache.cache_dir().display());
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn build_agent(args: &RunArgs) -> Result<Arc<dyn Agent>, RussoError> {
    let parser = JsonResponseParser::new().with_tool_calls_key(&args.tool_calls_key);
    let timeout = Duration::from_millis(args.timeout_ms);

    if args.agent_url.starts_with("ws://") || args.agent_url.starts_with("wss://") {
        let agent = WebSocketAgent::from_config(
            WebSocketAgentConfig::new(&args.agent_url).with_response_timeout(timeout),
        )
        .with_parser(parser);
        let agent = match args.ws_complete_key.clone() {
            Some(key) => agent.with_is_complete(move |messages| {
                messages
                    .last()
                    .is_some_and(|message| extract_path(message, &key).is_some())
            }),
            None => agent,
        };
        return Ok(Arc::new(agent));
    }

    let agent = HttpAgent::from_config(HttpAgentConfig::new(&args.agent_url).with_timeout(timeout))?
        .with_parser(parser);
    Ok(Arc::new(agent))
}

async fn run(args: RunArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let mut scenarios = filter_scenarios(load_scenarios(&args.scenarios)?, &args.filter);
    if scenarios.is_empty() {
        eprintln!("No scenarios matched.");
        return Ok(EXIT_NO_SCENARIOS);
    }
    for scenario in &mut scenarios {
        if let Some(runs) = args.runs {
            scenario.runs = runs;
        }
        if let Some(max_concurrency) = args.max_concurrency {
            scenario.max_concurrency = Some(max_concurrency);
        }
        scenario.validate()?;
    }

    let synthesizer: Arc<dyn Synthesizer> = match args.synthesizer {
        SynthesizerKind::Openai => {
            let openai = OpenAiSynthesizer::from_env()?;
            let key_extra = openai.cache_key_extra();
            Arc::new(
                CachedSynthesizer::new(openai, AudioCache::new(&args.cache_dir))
                    .with_key_extra(key_extra)
                    .with_enabled(!args.no_cache),
            )
        }
        SynthesizerKind::Text => Arc::new(TextSynthesizer),
    };
    let agent = build_agent(&args)?;
    let pipeline = Arc::new(Pipeline::new(synthesizer, agent));

    let cancellation = CancellationToken::new();
    {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancellation.cancel();
            }
        });
    }

    let out_path = args.out.clone().unwrap_or_else(default_out_path);
    ensure_parent_dir(&out_path)?;
    let mut writer = BufWriter::new(fs::File::create(&out_path)?);

    let total = scenarios.len();
    let mut passed = 0usize;

    for scenario in scenarios {
        let executor = scenario.executor(Arc::clone(&pipeline));
        let executor = &executor;
        let outcome = scenario
            .orchestrator()
            .with_cancellation(cancellation.clone())
            .run(scenario.prompts.clone(), move |trial| executor.execute(trial))
            .await?;

        match outcome {
            BatchOutcome::Completed(batch) => {
                if batch.passed() {
                    passed += 1;
                    println!(
                        "PASS {} ({}/{} runs)",
                        scenario.name,
                        batch.passed_count(),
                        batch.total()
                    );
                } else {
                    eprintln!("FAIL {}: {}", scenario.name, batch.summary());
                }

                let record = ScenarioRecord {
                    scenario: &scenario.name,
                    passed: batch.passed(),
                    pass_rate: batch.pass_rate(),
                    match_rate: batch.match_rate(),
                    runs: &batch.runs,
                };
                serde_json::to_writer(&mut writer, &record)?;
                writer.write_all(b"\n")?;
            }
            BatchOutcome::Cancelled { completed, total } => {
                writer.flush()?;
                eprintln!(
                    "CANCELLED {} after {completed}/{total} trials",
                    scenario.name
                );
                return Ok(EXIT_INTERRUPTED);
            }
        }
    }

    writer.flush()?;
    println!(
        "Results: {passed}/{total} scenarios passed, Output: {}",
        out_path.display()
    );

    Ok(if passed == total { 0 } else { EXIT_FAILED })
}
