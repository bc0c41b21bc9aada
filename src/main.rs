use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use nl_browser_test::executor::ExecutorConfig;
use nl_browser_test::interpreter::ActionKind;
use nl_browser_test::workflow::{OrchestrationService, WorkflowStateStore, default_pipeline};
use nl_browser_test::{
    CancellationToken, CompletionClient, ExecutionService, HttpCompletionClient, JsonFileStore, LlmConfig,
    MockBrowser, ParsedAction, RunConfig, ScriptedInference, StepOutcome, TestCase, TieredStepExecutor,
    WorkflowInput, WorkflowStatus, check_health, interpret, is_dropdown_instruction, is_payment_instruction,
};

/// NL Browser Test - natural-language browser test execution
#[derive(Parser, Debug)]
#[command(
    name = "nl-browser-test",
    about = "Interpret, plan and dry-run natural-language browser tests; generate them with an LLM pipeline",
    after_help = "ENVIRONMENT VARIABLES:\n\
        NLTEST_LLM_ENDPOINT        Chat-completions endpoint URL (legacy: LLM_ENDPOINT)\n\
        NLTEST_LLM_MODEL           Model name\n\
        NLTEST_PIPELINE_STAGES     Comma-separated pipeline stages\n\
        NLTEST_STORE_DIR           Base directory of the execution store\n\
        RUST_LOG                   Log filter (default: info)"
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interpret one instruction and print the parsed action
    Parse {
        /// The natural-language instruction
        instruction: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interpret every step of a test case and show how each would be resolved
    Plan {
        /// Test case file (JSON, or numbered lines)
        #[arg(short, long)]
        test_case: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Run a test case against an in-memory browser that accepts every target
    DryRun {
        #[arg(short, long)]
        test_case: PathBuf,

        /// Base URL for relative navigation
        #[arg(long)]
        base_url: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Generate a test case with the LLM pipeline
    Generate {
        /// Description of the feature to test
        #[arg(short, long)]
        description: String,

        /// URL of the application under test
        #[arg(long)]
        url: Option<String>,

        /// Workflow id (default: random)
        #[arg(long)]
        id: Option<String>,

        /// Chat-completions endpoint (default: from the environment)
        #[arg(long)]
        endpoint: Option<String>,

        /// Model name (default: from the environment)
        #[arg(long)]
        model: Option<String>,

        /// Write the generated test case to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// List stored executions, optionally removing old ones
    Executions {
        #[arg(long, env = "NLTEST_STORE_DIR", default_value = "/tmp/nl-browser-test")]
        store_dir: PathBuf,

        /// Remove executions older than this many hours
        #[arg(long)]
        cleanup_older_than: Option<u64>,

        #[arg(long)]
        json: bool,
    },

    /// Check that the LLM endpoint answers
    Health {
        /// Chat-completions endpoint (default: from the environment)
        #[arg(long)]
        endpoint: Option<String>,
    },
}

/// How the executor will resolve a parsed step
fn route(action: &ParsedAction) -> &'static str {
    match action.kind {
        ActionKind::Navigate | ActionKind::Assert if action.literal_value.is_some() => "direct",
        _ if action.is_sensitive() => "deterministic",
        _ => "ai-first",
    }
}

fn load_test_case(path: &Path) -> Result<TestCase, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    if let Ok(case) = serde_json::from_str::<TestCase>(&text) {
        return Ok(case);
    }
    TestCase::from_generated_text(&text)
        .ok_or_else(|| format!("No test steps found in {}", path.display()).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Parse { instruction, json } => {
            let action = interpret(&instruction);
            let dropdown = is_dropdown_instruction(&instruction);
            let payment = is_payment_instruction(&instruction);
            if json {
                let out = serde_json::json!({
                    "instruction": instruction,
                    "action": action,
                    "dropdown": dropdown,
                    "payment": payment,
                    "route": route(&action),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("Instruction: {}", instruction);
                println!("  Kind:     {}", action.kind);
                println!("  Target:   {}", action.target_hint);
                println!("  Value:    {}", action.literal_value.as_deref().unwrap_or("-"));
                println!("  Risk:     {:?}", action.risk_class);
                println!("  Dropdown: {}", dropdown);
                println!("  Payment:  {}", payment);
                println!("  Route:    {}", route(&action));
            }
        }

        Commands::Plan { test_case, json } => {
            let case = load_test_case(&test_case)?;
            let plan: Vec<_> = case
                .steps
                .iter()
                .enumerate()
                .map(|(index, step)| (index, step, interpret(&step.instruction)))
                .collect();

            if json {
                let out: Vec<_> = plan
                    .iter()
                    .map(|(index, step, action)| {
                        serde_json::json!({
                            "index": index,
                            "instruction": step.instruction,
                            "required": step.required,
                            "action": action,
                            "route": route(action),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("Test case: {} ({} steps)", case.name, case.step_count());
                for (index, step, action) in &plan {
                    let flag = if step.required { "" } else { " (optional)" };
                    println!("  [{}] {}{}", index, step.instruction, flag);
                    println!("      -> {} via {}", action.describe(), route(action));
                }
            }
        }

        Commands::DryRun {
            test_case,
            base_url,
            json,
        } => {
            let case = load_test_case(&test_case)?;
            let executor = TieredStepExecutor::new(Arc::new(ScriptedInference::new())).with_config(
                ExecutorConfig::default()
                    .action_timeout(Duration::from_secs(5))
                    .gateway_wait(Duration::from_millis(100)),
            );
            let service = ExecutionService::new(Arc::new(MockBrowser::permissive()), Arc::new(executor));
            let mut config = RunConfig::default().environment("dry-run");
            if let Some(url) = base_url {
                config = config.base_url(url);
            }

            let result = service.run_execution(&case, &config, &CancellationToken::new()).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Dry run: {} ({:?})", case.name, result.outcome);
                for step in &result.steps {
                    let mark = match step.outcome {
                        StepOutcome::Passed => "ok  ",
                        StepOutcome::Failed => "FAIL",
                        StepOutcome::Skipped => "skip",
                    };
                    println!("  {} [{}] {}", mark, step.index, step.instruction);
                    if !step.action_taken.is_empty() {
                        println!("         {}", step.action_taken);
                    }
                    if let Some(error) = &step.error_detail {
                        println!("         {}", error);
                    }
                }
            }
            if !result.passed() {
                std::process::exit(1);
            }
        }

        Commands::Generate {
            description,
            url,
            id,
            endpoint,
            model,
            output,
            json,
        } => {
            let endpoint = endpoint.unwrap_or_else(nl_browser_test::config::llm_endpoint);
            let model = model.unwrap_or_else(nl_browser_test::config::llm_model);
            let client: Arc<dyn CompletionClient> =
                Arc::new(HttpCompletionClient::new(LlmConfig::new(&endpoint).model(&model)));
            let stages = default_pipeline(client, &model, &nl_browser_test::config::get().pipeline.stages);
            let service = Arc::new(OrchestrationService::new(Arc::new(WorkflowStateStore::new()), stages));

            let mut input = WorkflowInput::new(description);
            if let Some(url) = url {
                input = input.with_target_url(url);
            }
            let handle = service.start_workflow(id, input)?;
            if !json {
                eprintln!("Workflow {} started", handle.workflow_id);
            }
            let state = handle.wait().await?;

            if let (Some(path), Some(case)) = (&output, &state.test_case) {
                std::fs::write(path, serde_json::to_vec_pretty(case)?)?;
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                println!("Workflow {}: {}", state.id, state.status);
                for (stage, progress) in &state.stage_progress {
                    println!("  {:<14} {:>3.0}%", stage, progress * 100.0);
                }
                println!("  Tokens: {}", state.token_usage.total);
                if let Some(error) = &state.error {
                    println!("  Error: {}", error);
                }
                match &state.test_case {
                    Some(case) => {
                        println!("Generated test case: {}", case.name);
                        for (index, step) in case.steps.iter().enumerate() {
                            println!("  {}. {}", index + 1, step.instruction);
                        }
                        if let Some(path) = &output {
                            println!("Saved to {}", path.display());
                        }
                    }
                    None if state.status == WorkflowStatus::Completed => {
                        println!("Final stage output did not contain a test case");
                    }
                    None => {}
                }
            }
            if state.status != WorkflowStatus::Completed {
                std::process::exit(1);
            }
        }

        Commands::Executions {
            store_dir,
            cleanup_older_than,
            json,
        } => {
            let store = JsonFileStore::new(store_dir);
            if let Some(hours) = cleanup_older_than {
                let removed = store.cleanup_old_executions(Duration::from_secs(hours * 3600))?;
                eprintln!("Removed {} execution(s) older than {}h", removed, hours);
            }

            let executions = store.list_executions()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&executions)?);
            } else if executions.is_empty() {
                println!("No executions in {}", store.base_dir().display());
            } else {
                for summary in &executions {
                    println!(
                        "{}  {:<9} {}  test case {} on {}",
                        summary.started_at.format("%Y-%m-%d %H:%M:%S"),
                        format!("{:?}", summary.outcome).to_lowercase(),
                        summary.execution_id,
                        summary.test_case_id,
                        summary.host
                    );
                }
            }
        }

        Commands::Health { endpoint } => {
            let endpoint = endpoint.unwrap_or_else(nl_browser_test::config::llm_endpoint);
            if check_health(&endpoint, 5).await? {
                println!("LLM endpoint responding at {}", endpoint);
            } else {
                eprintln!("LLM endpoint not responding at {}", endpoint);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
