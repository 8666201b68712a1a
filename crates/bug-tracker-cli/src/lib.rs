//! Command-line front end for the bug tracker.
//!
//! Every `bugs` subcommand builds the same JSON body the HTTP surface accepts
//! and hands it to [`bug_tracker_core::ops`], so both front ends share one
//! validation path. Results are printed as pretty JSON on stdout.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use bug_tracker_core::ops::{self, ListParams};
use bug_tracker_store_sqlite::SqliteBugStore;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Parser)]
#[command(name = "bt")]
#[command(about = "Bug tracker CLI")]
pub struct Cli {
    #[arg(long, env = "BUG_TRACKER_DB", default_value = "./bug_tracker.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Bugs {
        #[command(subcommand)]
        command: Box<BugsCommand>,
    },
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum BugsCommand {
    Create(CreateArgs),
    Show(IdArgs),
    List(ListArgs),
    Update(UpdateArgs),
    Status(StatusArgs),
    Delete(IdArgs),
}

#[derive(Debug, Subcommand)]
pub enum DbCommand {
    /// Reports the schema version read-only; a missing file is not created.
    Check,
    Migrate,
}

#[derive(Debug, Default, Args)]
pub struct BugFieldArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long)]
    reporter: Option<String>,
    #[arg(long)]
    assigned_to: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long)]
    steps_to_reproduce: Option<String>,
    #[arg(long)]
    expected_behavior: Option<String>,
    #[arg(long)]
    actual_behavior: Option<String>,
    #[arg(long)]
    environment: Option<String>,
    #[arg(long = "attachment")]
    attachments: Vec<String>,
    /// Base JSON object; individual flags override its keys.
    #[arg(long, default_value = "{}")]
    body_json: String,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    #[command(flatten)]
    fields: BugFieldArgs,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    #[arg(long)]
    id: String,
    #[command(flatten)]
    fields: BugFieldArgs,
}

#[derive(Debug, Args)]
pub struct IdArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    status: Option<String>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long)]
    page: Option<String>,
    #[arg(long)]
    limit: Option<String>,
    #[arg(long)]
    sort_by: Option<String>,
    #[arg(long)]
    order: Option<String>,
}

impl From<ListArgs> for ListParams {
    fn from(args: ListArgs) -> Self {
        Self {
            status: args.status,
            priority: args.priority,
            page: args.page,
            limit: args.limit,
            sort_by: args.sort_by,
            order: args.order,
        }
    }
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when the store cannot be opened or migrated, or when the
/// requested command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Db { command } => run_db(command, &cli.db),
        Command::Bugs { command } => {
            let mut store = SqliteBugStore::open(&cli.db)?;
            store.migrate()?;
            run_bugs(*command, &mut store)
        }
    }
}

/// Executes a `bugs` subcommand against an existing store handle.
///
/// # Errors
/// Returns an error when argument parsing, validation, or persistence fails.
pub fn run_bugs(command: BugsCommand, store: &mut SqliteBugStore) -> Result<()> {
    match command {
        BugsCommand::Create(args) => {
            let body = build_body(args.fields)?;
            print_json(&ops::create_bug(store, &body)?)
        }
        BugsCommand::Show(args) => print_json(&ops::get_bug(&*store, &args.id)?),
        BugsCommand::List(args) => print_json(&ops::list_bugs(&*store, &args.into())?),
        BugsCommand::Update(args) => {
            let body = build_body(args.fields)?;
            print_json(&ops::update_bug(store, &args.id, &body)?)
        }
        BugsCommand::Status(args) => {
            let mut body = Map::new();
            insert_text(&mut body, "status", args.status);
            print_json(&ops::set_bug_status(store, &args.id, &Value::Object(body))?)
        }
        BugsCommand::Delete(args) => print_json(&ops::delete_bug(store, &args.id)?),
    }
}

fn run_db(command: DbCommand, db_path: &Path) -> Result<()> {
    match command {
        DbCommand::Check => print_json(&SqliteBugStore::inspect(db_path)?),
        DbCommand::Migrate => {
            let store = SqliteBugStore::open(db_path)?;
            store.migrate()?;
            print_json(&store.schema_status()?)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_body_json(raw: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw).context("invalid --body-json value")?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow!("--body-json must be a JSON object")),
    }
}

fn build_body(fields: BugFieldArgs) -> Result<Value> {
    let mut body = parse_body_json(&fields.body_json)?;

    insert_text(&mut body, "title", fields.title);
    insert_text(&mut body, "description", fields.description);
    insert_text(&mut body, "status", fields.status);
    insert_text(&mut body, "priority", fields.priority);
    insert_text(&mut body, "reporter", fields.reporter);
    insert_text(&mut body, "assignedTo", fields.assigned_to);
    insert_list(&mut body, "tags", fields.tags);
    insert_text(&mut body, "stepsToReproduce", fields.steps_to_reproduce);
    insert_text(&mut body, "expectedBehavior", fields.expected_behavior);
    insert_text(&mut body, "actualBehavior", fields.actual_behavior);
    insert_text(&mut body, "environment", fields.environment);
    insert_list(&mut body, "attachments", fields.attachments);

    Ok(Value::Object(body))
}

fn insert_text(body: &mut Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(value) = value {
        body.insert(key.to_string(), Value::String(value));
    }
}

fn insert_list(body: &mut Map<String, Value>, key: &str, values: Vec<String>) {
    if !values.is_empty() {
        body.insert(
            key.to_string(),
            Value::Array(values.into_iter().map(Value::String).collect()),
        );
    }
}
