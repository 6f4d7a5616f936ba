mod client;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use comfy_table::Cell;
use owo_colors::OwoColorize;
use serde::Deserialize;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = ui::app_name())]
#[command(about = ui::build_banner())]
struct Cli {
    /// Path to the sekia control API's Unix domain socket.
    #[arg(long, default_value_os_t = sekia_control_api::default_path())]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Broker/registry/workflow summary
    Status,
    /// List known agents
    Agents,
    /// List loaded workflows
    Workflows,
    /// Reload every workflow from disk
    Reload,
    /// Publish a config-reload notification
    ConfigReload {
        /// Agent name, or omit for a broadcast reload
        target: Option<String>,
    },
}

#[derive(Deserialize)]
struct StatusResponse {
    uptime_seconds: u64,
    broker_up: bool,
    agent_count: usize,
    workflow_count: usize,
}

#[derive(Deserialize)]
struct AgentsResponse {
    agents: Vec<AgentRow>,
}

#[derive(Deserialize)]
struct AgentRow {
    name: String,
    version: String,
    status: String,
    events_processed: u64,
    errors: u64,
    last_seen: i64,
}

#[derive(Deserialize)]
struct WorkflowsResponse {
    workflows: Vec<WorkflowRow>,
}

#[derive(Deserialize)]
struct WorkflowRow {
    name: String,
    handlers: usize,
    events_processed: u64,
    errors: u64,
}

#[derive(Deserialize)]
struct ConfigReloadResponse {
    status: String,
    target: String,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        ui::print_error("command failed", &e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Status => print_status(&cli.socket),
        Commands::Agents => print_agents(&cli.socket),
        Commands::Workflows => print_workflows(&cli.socket),
        Commands::Reload => reload_workflows(&cli.socket),
        Commands::ConfigReload { target } => reload_config(&cli.socket, target.as_deref()),
    }
}

fn print_status(socket: &std::path::Path) -> anyhow::Result<()> {
    let status: StatusResponse = client::get_as(socket, "/api/v1/status")?;

    let mut table = ui::new_table();
    table.set_header(vec!["field", "value"]);
    table.add_row(vec![Cell::new("broker"), Cell::new(if status.broker_up { "up".green().to_string() } else { "down".red().to_string() })]);
    table.add_row(vec![Cell::new("uptime"), Cell::new(format!("{}s", status.uptime_seconds))]);
    table.add_row(vec![Cell::new("agents"), Cell::new(status.agent_count.to_string())]);
    table.add_row(vec![Cell::new("workflows"), Cell::new(status.workflow_count.to_string())]);
    println!("{table}");
    Ok(())
}

fn print_agents(socket: &std::path::Path) -> anyhow::Result<()> {
    let resp: AgentsResponse = client::get_as(socket, "/api/v1/agents")?;

    let mut table = ui::new_table();
    table.set_header(vec!["name", "version", "status", "processed", "errors", "last seen"]);
    for agent in resp.agents {
        table.add_row(vec![
            Cell::new(agent.name),
            Cell::new(agent.version),
            Cell::new(agent.status),
            Cell::new(agent.events_processed.to_string()),
            Cell::new(agent.errors.to_string()),
            Cell::new(agent.last_seen.to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn print_workflows(socket: &std::path::Path) -> anyhow::Result<()> {
    let resp: WorkflowsResponse = client::get_as(socket, "/api/v1/workflows")?;

    let mut table = ui::new_table();
    table.set_header(vec!["name", "handlers", "processed", "errors"]);
    for wf in resp.workflows {
        table.add_row(vec![
            Cell::new(wf.name),
            Cell::new(wf.handlers.to_string()),
            Cell::new(wf.events_processed.to_string()),
            Cell::new(wf.errors.to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn reload_workflows(socket: &std::path::Path) -> anyhow::Result<()> {
    let resp: ConfigReloadResponse = client::post_as(socket, "/api/v1/workflows/reload")?;
    println!("{} {}", resp.status.green(), "workflows".dimmed());
    Ok(())
}

fn reload_config(socket: &std::path::Path, target: Option<&str>) -> anyhow::Result<()> {
    let path = match target {
        Some(name) => format!("/api/v1/config/reload?target={name}"),
        None => "/api/v1/config/reload".to_owned(),
    };
    let resp: ConfigReloadResponse = client::post_as(socket, &path)?;
    println!("{} {} -> {}", resp.status.green(), "config-reload".dimmed(), resp.target);
    Ok(())
}
