//! # agentbench CLI
//!
//! Command-line interface for the tool-calling agent and its benchmark.
//!
//! Usage:
//!   agentbench run <task>
//!   agentbench chat
//!   agentbench bench --model <model> --trials <n>
//!   agentbench url --date 2025-01-31
//!   agentbench ledger
//!
//! Examples:
//!   agentbench run "Echo back the word hello"
//!   agentbench run --dry-run "Anything, nothing leaves the machine"
//!   agentbench bench -m llama-3.3-70b-versatile -n 5 --deadline-secs 600
//!   agentbench ledger --ledger runs/ledger.json
//!
//! The provider is configured from the environment, see `ProviderConfig::from_env`.

use agentbench_agent::ledger::DEFAULT_LEDGER;
use agentbench_agent::tools::ecmwf::ForecastFile;
use agentbench_agent::{
    benchmark_registry, run_trial, AgentConfig, AgentLoop, EcmwfClient, FileChecksumGrader,
    FileSizeGrader, Grader, Ledger, TaskPrompt, TrialConfig,
};
use agentbench_core::{
    ChatMessage, Error, FinishReason, Fragment, LlmProvider, OpenAIProvider, ProviderConfig,
    Result, ScriptedProvider,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_BENCH_MODEL: &str = "meta-llama/llama-4-maverick-17b-128e-instruct";

#[derive(Parser)]
#[command(name = "agentbench")]
#[command(author, version, about = "agentbench - a tool-calling agent loop and its benchmark")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output (debug logs, reasoning traces)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - only show the final answer
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single task with the agent
    Run {
        /// The task description
        #[arg(trailing_var_arg = true, required = true)]
        task: Vec<String>,

        /// Override the provider's default model
        #[arg(short, long)]
        model: Option<String>,

        /// Use one-shot completions instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// Replay a canned echo conversation instead of calling a provider
        #[arg(long)]
        dry_run: bool,
    },
    /// Interactive session; each line continues the same conversation
    Chat {
        /// Override the provider's default model
        #[arg(short, long)]
        model: Option<String>,

        /// Use one-shot completions instead of streaming
        #[arg(long)]
        no_stream: bool,
    },
    /// Run benchmark trials and append them to the ledger
    Bench {
        /// Models to benchmark (repeatable)
        #[arg(short, long = "model", default_values_t = [DEFAULT_BENCH_MODEL.to_string()])]
        models: Vec<String>,

        /// Trials per model
        #[arg(short = 'n', long, default_value = "1")]
        trials: usize,

        /// Task prompt file; the baseline download task when absent
        #[arg(short, long)]
        prompt_file: Option<PathBuf>,

        /// Forecast date for the baseline task (YYYY-MM-DD, default today UTC)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Ledger file
        #[arg(short, long, default_value = DEFAULT_LEDGER)]
        ledger: PathBuf,

        /// Parent directory of the trial workdirs
        #[arg(long, default_value = "runs")]
        runs_dir: PathBuf,

        /// Abort a trial after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Expected SHA-256 of the downloaded file
        #[arg(long, requires = "size")]
        sha256: Option<String>,

        /// Expected size in bytes of the downloaded file; an exact size
        /// check on its own, or the size paired with `--sha256`
        #[arg(long)]
        size: Option<u64>,
    },
    /// Print the open-data URL of a forecast file
    Url {
        /// Forecast date (YYYY-MM-DD)
        #[arg(short, long)]
        date: NaiveDate,

        #[arg(long, default_value = "06")]
        hh: String,

        #[arg(long, default_value = "oper")]
        stream: String,

        /// Forecast step in hours
        #[arg(long, default_value = "24")]
        step: u32,

        #[arg(long, default_value = "fc")]
        file_type: String,

        #[arg(long, default_value = "grib2")]
        file_format: String,
    },
    /// Show per-model results from the ledger
    Ledger {
        #[arg(short, long, default_value = DEFAULT_LEDGER)]
        ledger: PathBuf,
    },
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "agentbench=debug,agentbench_agent=debug,agentbench_core=debug"
    } else if quiet {
        "warn"
    } else {
        "agentbench=info,agentbench_agent=info,agentbench_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

fn provider_from_env(model: Option<&str>) -> Result<OpenAIProvider> {
    let mut config = ProviderConfig::from_env()?;
    if let Some(model) = model {
        config = config.with_model(model);
    }
    OpenAIProvider::new(config)
}

/// A two-round script: one echo call, then a text answer
fn dry_run_provider(task: &str) -> ScriptedProvider {
    let arguments = serde_json::json!({ "text": task }).to_string();
    ScriptedProvider::new()
        .with_model("dry-run")
        .with_round(vec![
            Fragment::reasoning("The user wants the task echoed back."),
            Fragment::tool_call(0, "call_0", "echo", arguments),
            Fragment::done(FinishReason::ToolCalls),
        ])
        .with_text_reply(format!("The echo tool returned: {}", task))
}

/// Print streamed text, tool calls and tool results as they happen
fn with_live_output<P: LlmProvider>(agent: AgentLoop<P>, verbose: bool) -> AgentLoop<P> {
    agent
        .with_fragment_callback(move |fragment| match fragment {
            Fragment::Text(delta) => {
                print!("{}", delta);
                let _ = std::io::stdout().flush();
            }
            Fragment::Reasoning(delta) if verbose => {
                eprint!("{}", delta);
            }
            _ => {}
        })
        .with_message_callback(|message| match message {
            ChatMessage::Assistant { tool_calls, .. } => {
                println!();
                for call in tool_calls {
                    println!("-> {}({})", call.name, truncate(&call.arguments, 120));
                }
            }
            ChatMessage::Tool { content, .. } => {
                println!("<- {}", truncate(content, 200));
            }
            _ => {}
        })
}

async fn run_task<P: LlmProvider>(
    provider: P,
    task: &str,
    config: AgentConfig,
    verbose: bool,
    quiet: bool,
) -> Result<()> {
    let mut agent = AgentLoop::new(provider, benchmark_registry(), config);
    if !quiet {
        agent = with_live_output(agent, verbose);
    }

    let summary = agent.run(task).await?;

    if verbose {
        println!("\n--- Transcript ---\n");
        for message in agent.conversation().messages() {
            message.pretty_print();
        }
    }

    if quiet {
        if let Some(answer) = agent.conversation().last_assistant() {
            println!("{}", answer.content());
        }
    } else {
        println!(
            "\n--- {} round(s), {} tool call(s), {} tool error(s), {} tokens ---",
            summary.rounds,
            summary.tool_calls,
            summary.tool_errors,
            summary.usage.total_tokens
        );
    }
    Ok(())
}

/// Interactive session: every input line is a follow-up task on the same
/// conversation. Ends at end of input or on `exit` / `quit`.
/// Returns the number of tasks run.
async fn chat<P: LlmProvider>(
    provider: P,
    config: AgentConfig,
    input: impl BufRead,
    verbose: bool,
    quiet: bool,
) -> Result<usize> {
    let mut agent = AgentLoop::new(provider, benchmark_registry(), config);
    if !quiet {
        agent = with_live_output(agent, verbose);
        println!("Chatting with {} (exit or Ctrl-D to quit)", agent.model());
    }

    let mut tasks = 0;
    let mut lines = input.lines();
    loop {
        if !quiet {
            print!("\n> ");
            let _ = std::io::stdout().flush();
        }
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.map_err(|e| Error::from(e).with_operation("chat"))?;
        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        if task == "exit" || task == "quit" {
            break;
        }

        tasks += 1;
        match agent.run(task).await {
            Ok(_) if quiet => {
                if let Some(answer) = agent.conversation().last_assistant() {
                    println!("{}", answer.content());
                }
            }
            Ok(_) => {}
            // the session survives a failed round; the next line retries
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    debug!(tasks, messages = agent.conversation().len(), "chat ended");
    Ok(tasks)
}

/// Checksum grading when a SHA-256 is given, an exact size check for
/// `--size` alone, otherwise a plausible size range for a grib2 field
fn pick_grader(sha256: Option<String>, size: Option<u64>) -> Box<dyn Grader> {
    match (sha256, size) {
        (Some(sha256), Some(size)) => Box::new(FileChecksumGrader::new(sha256, size)),
        (_, Some(size)) => Box::new(FileSizeGrader::new(size, size)),
        // a single-step global grib2 field is on the order of 100 MB
        _ => Box::new(FileSizeGrader::new(50_000_000, 200_000_000).with_extension("grib2")),
    }
}

#[allow(clippy::too_many_arguments)]
async fn bench(
    models: Vec<String>,
    trials: usize,
    prompt_file: Option<PathBuf>,
    date: Option<NaiveDate>,
    ledger_path: PathBuf,
    runs_dir: PathBuf,
    deadline_secs: Option<u64>,
    sha256: Option<String>,
    size: Option<u64>,
) -> Result<()> {
    let prompt = match prompt_file {
        Some(path) => {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                Error::from(e)
                    .with_operation("bench")
                    .with_context("path", path.display().to_string())
            })?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "custom".to_string());
            TaskPrompt::new(name, text)
        }
        None => TaskPrompt::baseline(date.unwrap_or_else(|| chrono::Utc::now().date_naive())),
    };

    let grader = pick_grader(sha256, size);

    let mut config = TrialConfig::default().with_runs_dir(runs_dir);
    if let Some(secs) = deadline_secs {
        config = config.with_deadline(Duration::from_secs(secs));
    }

    let mut ledger = Ledger::load(&ledger_path)?;
    info!(grader = grader.name(), prompt = %prompt.name, ledger = %ledger_path.display(), "benchmark started");

    for model in &models {
        for trial in 1..=trials {
            let provider = provider_from_env(Some(model))?;
            let agent = AgentLoop::new(provider, benchmark_registry(), AgentConfig::default());
            let record = run_trial(agent, &prompt, grader.as_ref(), &config).await?;

            println!(
                "[{}] trial {}/{}: {} ({} rounds, {}s) {}",
                model,
                trial,
                trials,
                if record.success() { "PASS" } else { "FAIL" },
                record.rounds,
                record.duration().num_seconds(),
                truncate(&record.grade.notes, 160)
            );
            ledger.append(record)?;
        }
    }

    for model in &models {
        if let Some(rate) = ledger.success_rate(model) {
            println!("{}: {:.1}% success", model, rate * 100.0);
        }
    }
    Ok(())
}

fn print_url(
    date: NaiveDate,
    hh: &str,
    stream: &str,
    step: u32,
    file_type: &str,
    file_format: &str,
) -> Result<()> {
    let date = date.format("%Y%m%d").to_string();
    let step = format!("{}h", step);
    let file = ForecastFile {
        date: &date,
        hh,
        model: "ifs",
        resol: "0p25",
        stream,
        step: &step,
        file_type,
        file_format,
    };
    println!("{}", EcmwfClient::new().build_file_url(&file)?);
    Ok(())
}

fn show_ledger(path: PathBuf) -> Result<()> {
    let ledger = Ledger::load(&path)?;
    if ledger.is_empty() {
        println!("No trials recorded in {}", path.display());
        return Ok(());
    }

    println!("Trials in {}:", path.display());
    println!(
        "  {:<48} {:>6} {:>8} {:>9} {:>8} {:>7}",
        "model", "trials", "success", "provider", "timeout", "rounds"
    );
    for stats in ledger.stats() {
        println!(
            "  {:<48} {:>6} {:>7.1}% {:>9} {:>8} {:>7.1}",
            truncate(&stats.model, 48),
            stats.trials,
            stats.success_rate() * 100.0,
            stats.provider_failures,
            stats.timeouts,
            stats.mean_rounds
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    debug!("arguments parsed");

    let result = match cli.command {
        Commands::Run {
            task,
            model,
            no_stream,
            dry_run,
        } => {
            let task = task.join(" ");
            let mut config = AgentConfig::default().with_streaming(!no_stream);
            if let Some(model) = &model {
                config = config.with_model(model);
            }
            if dry_run {
                run_task(dry_run_provider(&task), &task, config, cli.verbose, cli.quiet).await
            } else {
                match provider_from_env(model.as_deref()) {
                    Ok(provider) => run_task(provider, &task, config, cli.verbose, cli.quiet).await,
                    Err(e) => Err(e),
                }
            }
        }
        Commands::Chat { model, no_stream } => {
            let mut config = AgentConfig::default().with_streaming(!no_stream);
            if let Some(model) = &model {
                config = config.with_model(model);
            }
            match provider_from_env(model.as_deref()) {
                Ok(provider) => {
                    let stdin = std::io::stdin();
                    chat(provider, config, stdin.lock(), cli.verbose, cli.quiet)
                        .await
                        .map(|_| ())
                }
                Err(e) => Err(e),
            }
        }
        Commands::Bench {
            models,
            trials,
            prompt_file,
            date,
            ledger,
            runs_dir,
            deadline_secs,
            sha256,
            size,
        } => {
            bench(
                models,
                trials,
                prompt_file,
                date,
                ledger,
                runs_dir,
                deadline_secs,
                sha256,
                size,
            )
            .await
        }
        Commands::Url {
            date,
            hh,
            stream,
            step,
            file_type,
            file_format,
        } => print_url(date, &hh, &stream, step, &file_type, &file_format),
        Commands::Ledger { ledger } => show_ledger(ledger),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
