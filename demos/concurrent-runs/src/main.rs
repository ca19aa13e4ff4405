use std::{sync::Arc, time::Duration};

use clap::Parser;
use russo::{
    providers::{ScriptedAgent, TextSynthesizer},
    BatchOrchestrator, BatchOutcome, ExactEvaluator, MatchPolicy, Pipeline, ToolCall,
    TrialExecutor,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "concurrent-runs-demo")]
#[command(about = "Repeat a few prompts against a scripted agent under a concurrency bound")]
struct Args {
    #[arg(long, default_value_t = 5)]
    runs: usize,

    #[arg(long, default_value_t = 4)]
    max_concurrency: usize,

    /// Simulated agent latency per call
    #[arg(long, default_value_t = 200)]
    latency_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let booking = ToolCall::new("book_flight")
        .with_arg("from", "NYC")
        .with_arg("to", "LA");
    let agent = ScriptedAgent::new()
        .with_response("Book a flight from NYC to LA", vec![booking.clone().with_arg("class", "economy")])
        .with_response("I need to fly from New York to Los Angeles", vec![booking.clone()])
        .with_response("Get me to LA", vec![ToolCall::new("get_weather").with_arg("city", "LA")])
        .with_latency(Duration::from_millis(args.latency_ms));

    let pipeline = Arc::new(Pipeline::new(TextSynthesizer, agent));
    let executor = TrialExecutor::new(pipeline, vec![booking]).with_evaluator(ExactEvaluator::new(
        MatchPolicy::default().with_ignore_extra_args(true),
    ));

    let cancellation = CancellationToken::new();
    {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancellation.cancel();
            }
        });
    }

    let executor = &executor;
    let outcome = BatchOrchestrator::new()
        .with_runs(args.runs)
        .with_max_concurrency(args.max_concurrency)
        .with_cancellation(cancellation)
        .run(
            [
                "Book a flight from NYC to LA",
                "I need to fly from New York to Los Angeles",
                "Get me to LA",
            ],
            move |trial| executor.execute(trial),
        )
        .await?;

    match outcome {
        BatchOutcome::Completed(batch) => println!("{}", batch.summary()),
        BatchOutcome::Cancelled { completed, total } => {
            println!("cancelled after {completed}/{total} trials")
        }
    }
    Ok(())
}
