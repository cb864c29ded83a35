mod cli;

use clap::Parser;
use cli::{Cli, Commands, RunArgs, ValidateArgs};
use rmeter::engine::EngineController;
use rmeter::events::EngineEvent;
use rmeter::plan::Plan;
use rmeter::types::EngineStateKind;
use std::io::Write;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let exit_code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> Result<i32, String> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_plan(&args).await,
        Commands::Validate(args) => run_validate(&args),
    }
}

fn run_validate(args: &ValidateArgs) -> Result<i32, String> {
    match Plan::from_file(&args.plan) {
        Ok(plan) => {
            println!(
                "plan '{}' is valid ({} thread-group(s))",
                plan.name,
                plan.thread_groups.len()
            );
            Ok(0)
        }
        Err(e) => {
            eprintln!("{}", e);
            Ok(2)
        }
    }
}

async fn run_plan(args: &RunArgs) -> Result<i32, String> {
    let plan = Plan::from_file(&args.plan).map_err(|e| e.to_string())?;
    let plan_id = plan.id.clone();

    let controller = EngineController::new();
    let mut events = controller.subscribe();
    controller.insert_plan(plan);
    controller.start_test(&plan_id).map_err(|e| e.to_string())?;

    // First ctrl-c stops cooperatively, a second one force-stops.
    let signal_controller = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nstopping... (ctrl-c again to force)");
            let _ = signal_controller.stop_test();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = signal_controller.force_stop_test();
        }
    });

    if let Some(cap) = args.duration_cap {
        let cap_controller = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(cap).await;
            let _ = cap_controller.stop_test();
        });
    }

    let summary = loop {
        match events.recv().await {
            Ok(EngineEvent::Progress(progress)) => {
                if !args.quiet {
                    eprintln!(
                        "{:>7.1}s  {:>8} req  {:>6} err  {:>8.1} rps  mean {:>7.1} ms  p95 {:>7.1} ms  vus {}",
                        progress.elapsed_ms as f64 / 1000.0,
                        progress.completed_requests,
                        progress.total_errors,
                        progress.current_rps,
                        progress.mean_ms,
                        progress.p95_ms,
                        progress.active_vus,
                    );
                }
            }
            Ok(EngineEvent::Complete(summary)) => break *summary,
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(_) => return Err("event stream closed before completion".into()),
        }
    };

    let json = serde_json::to_string_pretty(&summary)
        .map_err(|e| format!("failed to serialise summary: {}", e))?;

    if let Some(path) = &args.output {
        let mut file = std::fs::File::create(path)
            .map_err(|e| format!("failed to create {}: {}", path.display(), e))?;
        file.write_all(json.as_bytes())
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
        eprintln!("summary written to {}", path.display());
    }

    if args.json {
        println!("{}", json);
    } else {
        print_summary(&summary);
    }

    let errored = controller.get_engine_status().state == EngineStateKind::Error;
    Ok(if errored { 3 } else { 0 })
}

fn print_summary(summary: &rmeter::types::Summary) {
    println!("\n{}", "=".repeat(60));
    println!("SUMMARY  {} ({})", summary.plan_name, summary.plan_id);
    println!("{}", "=".repeat(60));
    println!(
        "  requests     total {}  ok {}  failed {}",
        summary.total_requests, summary.successful_requests, summary.failed_requests
    );
    println!(
        "  latency ms   min {}  p50 {}  mean {:.1}  p95 {}  p99 {}  max {}",
        summary.min_ms, summary.p50_ms, summary.mean_ms, summary.p95_ms, summary.p99_ms, summary.max_ms
    );
    println!(
        "  throughput   {:.1} req/s   {} bytes received",
        summary.avg_rps, summary.total_bytes
    );
    if !summary.status_codes.is_empty() {
        let mut codes: Vec<_> = summary.status_codes.iter().collect();
        codes.sort_by_key(|(code, _)| **code);
        let line = codes
            .iter()
            .map(|(code, count)| format!("{}x{}", code, count))
            .collect::<Vec<_>>()
            .join("  ");
        println!("  status       {}", line);
    }
    if !summary.errors.is_empty() {
        let mut kinds: Vec<_> = summary.errors.iter().collect();
        kinds.sort_by_key(|(kind, _)| kind.as_str());
        let line = kinds
            .iter()
            .map(|(kind, count)| format!("{}: {}", kind, count))
            .collect::<Vec<_>>()
            .join("  ");
        println!("  errors       {}", line);
    }
}
