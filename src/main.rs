use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

use taskdeck::config::{ConfigError, RemoteConfig};
use taskdeck::guard;
use taskdeck::profile::{self, ProfileService};
use taskdeck::remote::{HttpRemote, Priority, ProfileUpdate, RemoteError, RemoteService, Task, TaskPatch};
use taskdeck::session_file::{self, SessionFileError};
use taskdeck::store::{SessionStore, StoreError, StoreState};
use taskdeck::tasks::{TaskDraft, TaskError, TaskService, TaskView};

/// Refresh the access token when it expires within this many seconds.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    SessionFile(#[from] SessionFileError),
    #[error("not signed in; run `taskdeck login` first")]
    NotSignedIn,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "taskdeck", about = "Personal task manager backed by a hosted auth and record service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password.
    Login(Credentials),
    /// Create an account. Does not sign in.
    Signup {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        name: String,
    },
    /// Sign out and forget the saved session.
    Logout,
    /// Show who is signed in.
    Whoami,
    Profile(ProfileCommand),
    Tasks(TasksCommand),
    /// Follow session changes until interrupted.
    Watch,
}

#[derive(Args, Debug)]
struct Credentials {
    #[arg(long, env = "TASKDECK_EMAIL")]
    email: String,
    #[arg(long, env = "TASKDECK_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args, Debug)]
struct ProfileCommand {
    #[command(subcommand)]
    command: ProfileSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProfileSubcommand {
    Show,
    Update {
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        timezone: Option<String>,
    },
    /// Replace the preferences document with a JSON value.
    Preferences {
        data: String,
    },
}

#[derive(Args, Debug)]
struct TasksCommand {
    #[command(subcommand)]
    command: TasksSubcommand,
}

#[derive(Subcommand, Debug)]
enum TasksSubcommand {
    List {
        #[arg(long, default_value_t = false)]
        shared: bool,
    },
    Add {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value_t = Priority::Medium)]
        priority: Priority,
        #[arg(long, default_value = "", help = "Due date as YYYY-MM-DD")]
        due: String,
        #[arg(long, default_value = "", help = "Comma-separated tags")]
        tags: String,
        #[arg(long, default_value_t = false)]
        shared: bool,
    },
    Done {
        id: String,
        #[arg(long, default_value_t = false, help = "Mark as not done instead")]
        undo: bool,
    },
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
    },
    Delete {
        id: String,
    },
}

struct CliContext {
    config: RemoteConfig,
    remote: Arc<HttpRemote>,
    store: SessionStore,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = RemoteConfig::from_env()?;
    let remote = Arc::new(HttpRemote::new(&config)?);
    restore_session(&config, &remote).await?;
    let store = SessionStore::new(remote.clone(), None);
    let ctx = CliContext { config, remote, store };

    let outcome = run(&ctx, cli.command).await;
    // Persist whatever the service left us with, even after a failed command.
    session_file::save(&ctx.config.session_file, ctx.remote.tokens().as_ref())?;
    outcome
}

async fn run(ctx: &CliContext, command: Command) -> Result<(), CliError> {
    match command {
        Command::Login(credentials) => run_login(ctx, credentials).await,
        Command::Signup { credentials, name } => run_signup(ctx, credentials, &name).await,
        Command::Logout => run_logout(ctx).await,
        Command::Whoami => run_whoami(ctx).await,
        Command::Profile(profile) => run_profile(ctx, profile).await,
        Command::Tasks(tasks) => run_tasks(ctx, tasks).await,
        Command::Watch => run_watch(ctx).await,
    }
}

/// Load saved tokens into the client, refreshing them if they are about to
/// expire. A refused refresh just leaves the CLI signed out.
async fn restore_session(config: &RemoteConfig, remote: &HttpRemote) -> Result<(), CliError> {
    let Some(tokens) = session_file::load(&config.session_file)? else {
        return Ok(());
    };
    let stale = tokens.is_expired_at(unix_now() + REFRESH_MARGIN_SECS);
    remote.restore(tokens);
    if stale {
        if let Err(err) = remote.refresh_session().await {
            tracing::warn!(error = %err, "saved session could not be refreshed");
        }
    }
    Ok(())
}

/// Mount the store and fail unless someone is signed in.
async fn require_session(store: &SessionStore) -> Result<(), CliError> {
    store.mount().await?;
    if guard::should_redirect_unauth(&store.state()) {
        return Err(CliError::NotSignedIn);
    }
    Ok(())
}

async fn run_login(ctx: &CliContext, credentials: Credentials) -> Result<(), CliError> {
    ctx.store.sign_in(&credentials.email, &credentials.password).await?;
    if let Some(session) = ctx.store.session() {
        println!("signed in as {}", profile::display_name(&session));
    }
    Ok(())
}

async fn run_signup(ctx: &CliContext, credentials: Credentials, name: &str) -> Result<(), CliError> {
    ctx.store.sign_up(&credentials.email, &credentials.password, name).await?;
    println!("account created for {}; run `taskdeck login` to sign in", credentials.email);
    Ok(())
}

async fn run_logout(ctx: &CliContext) -> Result<(), CliError> {
    let outcome = ctx.store.sign_out().await;
    println!("signed out");
    outcome.map_err(CliError::from)
}

async fn run_whoami(ctx: &CliContext) -> Result<(), CliError> {
    require_session(&ctx.store).await?;
    if let Some(session) = ctx.store.session() {
        println!("{}", profile::display_name(&session));
        println!("  id:    {}", session.id());
        if let Some(email) = session.email() {
            println!("  email: {email}");
        }
    }
    Ok(())
}

async fn run_profile(ctx: &CliContext, command: ProfileCommand) -> Result<(), CliError> {
    require_session(&ctx.store).await?;
    let profiles = ProfileService::new(ctx.store.clone());
    let profile = match command.command {
        ProfileSubcommand::Show => profiles.load().await?,
        ProfileSubcommand::Update { full_name, display_name, bio, timezone } => {
            let update = ProfileUpdate { full_name, display_name, bio, timezone };
            profiles.save(update).await?
        }
        ProfileSubcommand::Preferences { data } => {
            let preferences = serde_json::from_str(&data)?;
            profiles.set_preferences(preferences).await?
        }
    };
    print_json(&profile)
}

async fn run_tasks(ctx: &CliContext, command: TasksCommand) -> Result<(), CliError> {
    require_session(&ctx.store).await?;
    let tasks = TaskService::new(ctx.store.clone());
    match command.command {
        TasksSubcommand::List { shared } => {
            let view = if shared { TaskView::Shared } else { TaskView::Personal };
            let list = tasks.list(view).await?;
            if list.is_empty() {
                println!("no tasks");
            }
            for task in &list {
                println!("{}", task_line(task));
            }
        }
        TasksSubcommand::Add { title, description, priority, due, tags, shared } => {
            let draft = TaskDraft { title, description, priority, due_date: due, tags, is_shared: shared };
            let task = tasks.create(draft).await?;
            println!("{}", task_line(&task));
        }
        TasksSubcommand::Done { id, undo } => {
            let task = tasks.set_completed(&id, !undo).await?;
            println!("{}", task_line(&task));
        }
        TasksSubcommand::Edit { id, title, priority } => {
            let patch = TaskPatch { title, priority, ..TaskPatch::default() };
            let task = tasks.update(&id, patch).await?;
            println!("{}", task_line(&task));
        }
        TasksSubcommand::Delete { id } => {
            tasks.delete(&id).await?;
            println!("deleted {id}");
        }
    }
    Ok(())
}

/// Print every store transition and keep the access token fresh until
/// Ctrl-C.
async fn run_watch(ctx: &CliContext) -> Result<(), CliError> {
    let _printer = ctx.store.subscribe(|state| println!("{}", state_line(state)));
    let watcher = ctx.store.watch_auth_changes();
    if let Err(err) = ctx.store.mount().await {
        tracing::warn!(error = %err, "initial auth check failed");
    }

    let mut changes = ctx.remote.on_auth_state_change();
    let mut tick = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(change) = changes.next() => {
                println!("auth change: {:?}", change.event);
            }
            _ = tick.tick() => {
                let due = ctx
                    .remote
                    .tokens()
                    .is_some_and(|t| t.is_expired_at(unix_now() + REFRESH_MARGIN_SECS));
                if due {
                    if let Err(err) = ctx.remote.refresh_session().await {
                        tracing::warn!(error = %err, "token refresh failed");
                    }
                }
            }
        }
    }

    if let Some(watcher) = watcher {
        watcher.unsubscribe();
    }
    Ok(())
}

fn state_line(state: &StoreState) -> String {
    let who = state
        .session
        .as_ref()
        .map_or_else(|| "signed out".to_owned(), |s| format!("signed in as {}", profile::display_name(s)));
    let mut line = format!("session: {who}");
    if state.loading {
        line.push_str(" (checking)");
    }
    if let Some(err) = &state.error {
        line.push_str(&format!(" [{}: {err}]", err.kind()));
    }
    line
}

fn task_line(task: &Task) -> String {
    let check = if task.completed { "x" } else { " " };
    let due = task.due_date.map(|d| format!(" due {d}")).unwrap_or_default();
    let tags = task
        .tags
        .as_ref()
        .map(|tags| tags.iter().map(|t| format!(" #{t}")).collect::<String>())
        .unwrap_or_default();
    format!("[{check}] {:<6} {}  {}{due}{tags}", task.priority, task.id, task.title)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
