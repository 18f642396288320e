//! hostbridgectl - Control CLI for a running hostbridge server
//!
//! Connects models, submits tasks and waits for their results through the
//! HTTP API.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use hostbridge::client::{ControlClient, DEFAULT_POLL_INTERVAL};
use hostbridge::protocol::{TaskStatus, TaskStatusResponse};
use hostbridge::task::CommandParams;

const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "Error: {err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let client = ControlClient::new(&cli.server, cli.api_key.unwrap_or_default())
        .context("creating HTTP client")?
        .with_model_id(cli.model_id);

    match cli.command {
        Command::Status => handle_status(&client, cli.json).await,
        Command::Models { command } => handle_models(&client, command, cli.json).await,
        Command::Exec {
            command,
            args,
            cwd,
            timeout,
        } => {
            let params = CommandParams {
                command,
                args,
                working_dir: cwd.map(|dir| dir.display().to_string()),
                timeout,
            };
            let task = client.run_command(params).await?;
            handle_exec(task, cli.json)
        }
        Command::File { command } => handle_file(&client, command, cli.json).await,
        Command::Program { command } => handle_program(&client, command, cli.json).await,
        Command::Query { model, prompt } => {
            let task = client.query_model(&model, &prompt).await?;
            if cli.json {
                return print_json(&task);
            }
            let result = task_result(task)?;
            println!("{}", result["response"].as_str().unwrap_or_default());
            Ok(())
        }
        Command::Task {
            id,
            wait,
            timeout,
        } => handle_task(&client, &id, wait, timeout, cli.json).await,
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "hostbridgectl",
    author,
    version,
    about = "Control CLI for hostbridge - connect models and run tasks on the host."
)]
struct Cli {
    /// hostbridge server URL
    #[arg(long, short = 's', default_value = DEFAULT_SERVER_URL, env = "HOSTBRIDGE_SERVER_URL")]
    server: String,

    /// API key sent as a bearer token
    #[arg(long, env = "HOSTBRIDGE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Client name recorded on submitted tasks
    #[arg(long, default_value = "hostbridgectl")]
    model_id: String,

    /// Output machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check server status
    Status,

    /// Manage connected models
    Models {
        #[command(subcommand)]
        command: ModelsCommand,
    },

    /// Run a command on the host (no shell)
    Exec {
        /// Program to run
        command: String,
        /// Arguments passed verbatim
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Working directory
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Deadline in seconds (server default when omitted)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Read, write, delete and list files on the host
    File {
        #[command(subcommand)]
        command: FileCommand,
    },

    /// Start, stop and list tracked programs
    Program {
        #[command(subcommand)]
        command: ProgramCommand,
    },

    /// Send a prompt to a connected model
    Query {
        /// Connected model id
        model: String,
        /// Prompt text
        prompt: String,
    },

    /// Show a task
    Task {
        /// Task ID
        id: String,
        /// Poll until the task finishes
        #[arg(long)]
        wait: bool,
        /// Give up waiting after this many seconds
        #[arg(long, requires = "wait")]
        timeout: Option<u64>,
    },
}

#[derive(Debug, Subcommand)]
enum ModelsCommand {
    /// List connected models
    List,
    /// Connect a model
    Connect {
        /// Model id
        model_id: String,
        /// Backend type (ollama, claude, claude_desktop)
        model_type: String,
        /// Backend configuration as a JSON object
        #[arg(long, default_value = "{}")]
        config: String,
    },
    /// Disconnect a model
    Disconnect {
        /// Model id
        model_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum FileCommand {
    /// Print a text file
    Read { path: String },
    /// Write a file (content from --content or stdin)
    Write {
        path: String,
        #[arg(long)]
        content: Option<String>,
    },
    /// Delete a file or directory tree
    Delete { path: String },
    /// List a directory recursively
    List { path: String },
}

#[derive(Debug, Subcommand)]
enum ProgramCommand {
    /// Start a program in the background
    Start {
        program: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Stop a tracked program
    Stop { pid: u32 },
    /// List tracked programs
    List,
}

async fn handle_status(client: &ControlClient, json: bool) -> Result<()> {
    let health = client
        .health()
        .await
        .with_context(|| format!("contacting server at {}", client.base_url()))?;

    if json {
        return print_json(&health);
    }

    println!("Server is running at {}", client.base_url());
    println!("  Version: {}", health.version);
    println!(
        "  Tasks: {} processing, {} total",
        health.tasks_processing, health.tasks_total
    );
    println!("  Tracked programs: {}", health.tracked_processes);
    println!("  Connected models: {}", health.connected_models);
    Ok(())
}

async fn handle_models(client: &ControlClient, command: ModelsCommand, json: bool) -> Result<()> {
    match command {
        ModelsCommand::List => {
            let models = client.list_models().await?;
            if json {
                return print_json(&models);
            }
            println!("{:<24} {:<16} CONFIG", "MODEL", "TYPE");
            println!("{}", "-".repeat(60));
            for model in models {
                println!("{:<24} {:<16} {}", model.model_id, model.model_type, model.config);
            }
        }
        ModelsCommand::Connect {
            model_id,
            model_type,
            config,
        } => {
            let config: Value =
                serde_json::from_str(&config).context("parsing --config as JSON")?;
            if !config.is_object() {
                bail!("--config must be a JSON object");
            }
            let response = client.connect_model(&model_id, &model_type, config).await?;
            if json {
                return print_json(&response);
            }
            println!("{}", response.message);
        }
        ModelsCommand::Disconnect { model_id } => {
            let response = client.disconnect_model(&model_id).await?;
            if json {
                return print_json(&response);
            }
            println!("{}", response.message);
        }
    }
    Ok(())
}

fn handle_exec(task: TaskStatusResponse, json: bool) -> Result<()> {
    if json {
        return print_json(&task);
    }

    let result = task_result(task)?;
    print!("{}", result["stdout"].as_str().unwrap_or_default());
    eprint!("{}", result["stderr"].as_str().unwrap_or_default());
    io::stdout().flush().ok();

    let code = result["returncode"].as_i64().unwrap_or(-1);
    if code != 0 {
        bail!("command exited with status {code}");
    }
    Ok(())
}

async fn handle_file(client: &ControlClient, command: FileCommand, json: bool) -> Result<()> {
    let task = match command {
        FileCommand::Read { path } => {
            let task = client.read_file(&path).await?;
            if json {
                return print_json(&task);
            }
            let result = task_result(task)?;
            print!("{}", result["content"].as_str().unwrap_or_default());
            io::stdout().flush().ok();
            return Ok(());
        }
        FileCommand::Write { path, content } => {
            let content = match content {
                Some(content) => content,
                None => io::read_to_string(io::stdin()).context("reading content from stdin")?,
            };
            client.write_file(&path, &content).await?
        }
        FileCommand::Delete { path } => client.delete_path(&path).await?,
        FileCommand::List { path } => {
            let task = client.list_dir(&path).await?;
            if json {
                return print_json(&task);
            }
            let result = task_result(task)?;
            for entry in result["files"].as_array().into_iter().flatten() {
                println!("{}", entry.as_str().unwrap_or_default());
            }
            return Ok(());
        }
    };

    if json {
        return print_json(&task);
    }
    let result = task_result(task)?;
    match result.get("bytes_written") {
        Some(bytes) => println!("Wrote {} bytes to {}", bytes, result["path"].as_str().unwrap_or_default()),
        None => println!("Deleted {}", result["path"].as_str().unwrap_or_default()),
    }
    Ok(())
}

async fn handle_program(client: &ControlClient, command: ProgramCommand, json: bool) -> Result<()> {
    let task = match command {
        ProgramCommand::Start { program, args } => client.start_program(&program, args).await?,
        ProgramCommand::Stop { pid } => client.stop_program(pid).await?,
        ProgramCommand::List => {
            let task = client.list_programs().await?;
            if json {
                return print_json(&task);
            }
            let result = task_result(task)?;
            println!("{:<8} {:<8} {:<26} PROGRAM", "PID", "RUNNING", "STARTED");
            println!("{}", "-".repeat(70));
            for process in result["processes"].as_array().into_iter().flatten() {
                println!(
                    "{:<8} {:<8} {:<26} {}",
                    process["pid"],
                    process["running"],
                    process["started_at"].as_str().unwrap_or("-"),
                    process["program"].as_str().unwrap_or("-"),
                );
            }
            return Ok(());
        }
    };

    if json {
        return print_json(&task);
    }
    let result = task_result(task)?;
    println!("{}", result["message"].as_str().unwrap_or_default());
    if result["forced"].as_bool() == Some(true) {
        println!("  (did not exit after SIGTERM, killed)");
    }
    Ok(())
}

async fn handle_task(
    client: &ControlClient,
    id: &str,
    wait: bool,
    timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    let task = if wait {
        client
            .wait_for_task(id, DEFAULT_POLL_INTERVAL, timeout.map(Duration::from_secs))
            .await?
    } else {
        client.task_status(id).await?
    };

    if json {
        return print_json(&task);
    }

    println!("Task: {}", task.task_id);
    println!("  Type: {}", task.task_type);
    println!("  Model: {}", task.model_id);
    println!("  Status: {}", task.status);
    println!("  Created: {}", task.created_at);
    println!("  Updated: {}", task.updated_at);
    if let Some(kind) = task.error_kind {
        println!("  Error kind: {kind}");
    }
    if let Some(error) = &task.error {
        println!("  Error: {error}");
    }
    if let Some(result) = &task.result {
        println!("  Result: {}", serde_json::to_string_pretty(result)?);
    }
    Ok(())
}

/// The result of a finished task, or its error.
fn task_result(task: TaskStatusResponse) -> Result<Value> {
    match task.status {
        TaskStatus::Completed => Ok(task.result.unwrap_or(Value::Null)),
        TaskStatus::Failed => {
            let kind = task
                .error_kind
                .map(|kind| kind.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            bail!(
                "task {} failed ({}): {}",
                task.task_id,
                kind,
                task.error.unwrap_or_default()
            )
        }
        TaskStatus::Processing => bail!("task {} is still processing", task.task_id),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
