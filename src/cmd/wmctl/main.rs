use clap::{Parser, Subcommand};
use std::{fs, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wm_kernel::internal::{
    exec::{engine::ExecutionEngine, policy::ExecutionPolicy},
    plan::ir::Plan,
    registry::{load_tool_entries, load_tool_registry},
};

#[derive(Parser)]
#[command(name = "wmctl")]
#[command(about = "Waste-management plan kernel CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan file
    Run {
        /// Path to the plan file (JSON)
        #[arg(short, long)]
        plan_file: String,

        /// Output file for results
        #[arg(short, long)]
        out: Option<String>,

        /// Maximum number of steps running at once
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Per-invocation tool timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Total attempts per step
        #[arg(long)]
        max_retries: Option<u32>,

        /// Base delay between attempts in milliseconds
        #[arg(long)]
        retry_delay_ms: Option<u64>,

        /// Abort on the first failed step
        #[arg(long)]
        fail_fast: bool,
    },
    /// Check a plan's structure and dependencies without running it
    Validate {
        /// Path to the plan file (JSON)
        #[arg(short, long)]
        plan_file: String,
    },
    /// List the configured tool directory
    Tools,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "wm_kernel=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            plan_file,
            out,
            max_parallel,
            timeout_ms,
            max_retries,
            retry_delay_ms,
            fail_fast,
        } => {
            let mut policy = ExecutionPolicy::from_env();
            if let Some(v) = max_parallel {
                policy.max_parallel_executions = v;
            }
            if let Some(v) = timeout_ms {
                policy.tool_timeout_ms = v;
            }
            if let Some(v) = max_retries {
                policy.max_retries = v;
            }
            if let Some(v) = retry_delay_ms {
                policy.retry_delay_ms = v;
            }
            if fail_fast {
                policy.fail_fast = true;
            }
            run_plan(&plan_file, out.as_deref(), policy).await?;
        }
        Commands::Validate { plan_file } => {
            validate_plan(&plan_file)?;
        }
        Commands::Tools => {
            for entry in load_tool_entries() {
                let tool = entry.build();
                println!(
                    "{}\t{:?}\t{}\t{}",
                    entry.name,
                    entry.kind,
                    entry.url,
                    tool.description()
                );
            }
        }
    }

    Ok(())
}

fn read_plan(plan_file: &str) -> Result<Plan, Box<dyn std::error::Error>> {
    let plan_content = fs::read_to_string(plan_file)?;
    Plan::from_json(serde_json::from_str(&plan_content)?).map_err(|e| {
        eprintln!("Plan is invalid: {}", e);
        Box::<dyn std::error::Error>::from(e)
    })
}

async fn run_plan(
    plan_file: &str,
    out: Option<&str>,
    policy: ExecutionPolicy,
) -> Result<(), Box<dyn std::error::Error>> {
    let plan = read_plan(plan_file)?;
    let registry = Arc::new(load_tool_registry().await);
    let engine = ExecutionEngine::new(registry).with_policy(policy);

    match engine.execute_with_report(&plan).await {
        Ok(report) => {
            let output = serde_json::json!({
                "status": "completed",
                "plan_id": report.plan_id,
                "duration_ms": report.duration_ms,
                "failed_steps": report.failed_steps(),
                "results": report.results,
            });

            if let Some(out_path) = out {
                fs::write(out_path, serde_json::to_string_pretty(&output)?)?;
                println!("Plan completed. Results written to {}", out_path);
            } else {
                println!("{}", serde_json::to_string_pretty(&output)?);
            }

            Ok(())
        }
        Err(e) => {
            eprintln!("Plan execution failed: {}", e);
            Err(Box::new(e))
        }
    }
}

fn validate_plan(plan_file: &str) -> Result<(), Box<dyn std::error::Error>> {
    let plan = read_plan(plan_file)?;
    let engine = ExecutionEngine::new(Arc::default());
    let graph = engine.validate(&plan).map_err(|e| {
        eprintln!("Plan is invalid: {}", e);
        e
    })?;
    println!(
        "Plan is valid: {} steps, {} with no dependencies",
        graph.len(),
        graph.roots().len()
    );
    Ok(())
}
