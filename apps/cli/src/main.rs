use std::cell::Cell;
use std::env;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use rsession_core::{client_event_queue, ClientEvent, DeferredInitSignal, NotifyWatcher};
use rsession_project::{
    EncodingRsNormalizer, FileMonitorCallbacks, ProjectContext, ProjectError, YesNoAsk,
};
use rsession_settings::UserSettingsStore;
use serde_json::json;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(
    name = "rsession-cli",
    about = "Open and inspect project contexts for an R session",
    author,
    version
)]
struct Cli {
    /// 使用者設定檔；預設為 ~/.rsession/settings.json。 / User settings file (defaults to ~/.rsession/settings.json).
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,
    /// 覆寫作業系統使用者名稱。 / Override the OS user name used for the scratch path.
    #[arg(long, global = true, value_name = "NAME")]
    user: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 開啟專案並輸出其狀態。 / Open a project, run both startup phases and print its state as JSON.
    Open(OpenArgs),
    /// 輸出專案的暫存目錄。 / Print (and create) the project's scratch path.
    ScratchPath(ProjectArgs),
    /// 檢視或修改專案設定。 / Show or update the project configuration.
    Config(ConfigArgs),
    /// 輸出使用者設定。 / Print the effective user settings.
    Settings,
}

#[derive(Args)]
struct ProjectArgs {
    /// 專案檔路徑。 / Path to the project file.
    #[arg(value_name = "PROJECT")]
    project: PathBuf,
}

#[derive(Args)]
struct OpenArgs {
    #[command(flatten)]
    project: ProjectArgs,

    /// 持續監看檔案變更的毫秒數。 / Keep pumping monitor events for this many milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 0)]
    watch_ms: u64,
}

#[derive(Args)]
struct ConfigArgs {
    #[command(flatten)]
    project: ProjectArgs,

    /// 專案文字編碼。 / Project text encoding.
    #[arg(long, value_name = "ENCODING")]
    encoding: Option<String>,

    /// Tab 寬度。 / Number of spaces per tab.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..=64))]
    tab_width: Option<u32>,

    /// 以空白取代 Tab。 / Insert spaces instead of tabs.
    #[arg(long, value_name = "true|false")]
    use_spaces: Option<bool>,

    /// 結束時是否儲存工作區。 / Whether to save the workspace on exit.
    #[arg(long, value_name = "default|yes|no|ask", value_parser = parse_yes_no_ask)]
    save_workspace: Option<YesNoAsk>,
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("RSESSION_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<()> {
    let Cli {
        settings,
        user,
        command,
    } = Cli::parse();
    let settings_path = match settings {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let store = UserSettingsStore::load(&settings_path)
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;

    match command {
        Commands::Open(args) => execute_open(args, &store, user),
        Commands::ScratchPath(args) => execute_scratch_path(args, &store, user),
        Commands::Config(args) => execute_config(args, &store, user),
        Commands::Settings => {
            println!("{}", serde_json::to_string_pretty(store.settings())?);
            Ok(())
        }
    }
}

fn execute_open(args: OpenArgs, store: &UserSettingsStore, user: Option<String>) -> Result<()> {
    let (mut context, client_rx) = start_project(&args.project.project, store, user)?;

    let settled = Rc::new(Cell::new(false));
    let on_ok = Rc::clone(&settled);
    let on_err = Rc::clone(&settled);
    context.register_file_monitor_callbacks(
        FileMonitorCallbacks::new()
            .on_registered(move |_| on_ok.set(true))
            .on_registration_error(move |_| on_err.set(true)),
    );

    let mut deferred = DeferredInitSignal::new();
    context
        .initialize(&EncodingRsNormalizer, &mut deferred)
        .map_err(|err| project_failure(&args.project.project, &err))?;
    deferred.fire();

    // Registration completes on the watcher's own thread.
    let registration_deadline = Instant::now() + REGISTRATION_TIMEOUT;
    context.process_events();
    while !settled.get() && Instant::now() < registration_deadline {
        thread::sleep(POLL_INTERVAL);
        context.process_events();
    }

    let deadline = Instant::now() + Duration::from_millis(args.watch_ms);
    while Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
        context.process_events();
    }

    let events: Vec<_> = client_rx.try_iter().map(|event| event.to_json()).collect();
    let summary = json!({
        "project": context.identity(),
        "config": context.config(),
        "ui_prefs": context.ui_prefs(),
        "monitor_state": context.monitor_state(),
        "events": events,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    context.close();
    Ok(())
}

fn execute_scratch_path(
    args: ProjectArgs,
    store: &UserSettingsStore,
    user: Option<String>,
) -> Result<()> {
    let (context, _client_rx) = start_project(&args.project, store, user)?;
    let scratch = context
        .scratch_path()
        .ok_or_else(|| anyhow!("project has no scratch path"))?;
    println!("{}", scratch.display());
    Ok(())
}

fn execute_config(args: ConfigArgs, store: &UserSettingsStore, user: Option<String>) -> Result<()> {
    let (mut context, _client_rx) = start_project(&args.project.project, store, user)?;

    let mut config = context.config().clone();
    let mut changed = false;
    if let Some(encoding) = args.encoding {
        config.encoding = encoding;
        changed = true;
    }
    if let Some(width) = args.tab_width {
        config.num_spaces_for_tab = width;
        changed = true;
    }
    if let Some(use_spaces) = args.use_spaces {
        config.use_spaces_for_tab = use_spaces;
        changed = true;
    }
    if let Some(save_workspace) = args.save_workspace {
        config.save_workspace = save_workspace;
        changed = true;
    }

    if changed {
        context
            .update_config(config)
            .map_err(|err| project_failure(&args.project.project, &err))?;
    }
    println!("{}", serde_json::to_string_pretty(context.config())?);
    Ok(())
}

fn start_project(
    project: &Path,
    store: &UserSettingsStore,
    user: Option<String>,
) -> Result<(ProjectContext, Receiver<ClientEvent>)> {
    let (watcher, inbox) = NotifyWatcher::with_inbox();
    let (queue, client_rx) = client_event_queue();
    let mut context = ProjectContext::new(Box::new(watcher), inbox, queue);
    if user.is_some() {
        context = context.with_username(user);
    }
    context
        .startup(project, store)
        .map_err(|err| project_failure(project, &err))?;
    Ok((context, client_rx))
}

fn project_failure(project: &Path, err: &ProjectError) -> anyhow::Error {
    anyhow!("unable to open {}: {}", project.display(), err.user_message())
}

fn default_settings_path() -> Result<PathBuf> {
    let base = match env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")) {
        Some(home) => PathBuf::from(home),
        None => env::current_dir().context("failed to determine current directory")?,
    };
    Ok(base.join(".rsession").join("settings.json"))
}

fn parse_yes_no_ask(value: &str) -> Result<YesNoAsk, String> {
    match value.to_ascii_lowercase().as_str() {
        "default" => Ok(YesNoAsk::Default),
        "yes" => Ok(YesNoAsk::Yes),
        "no" => Ok(YesNoAsk::No),
        "ask" => Ok(YesNoAsk::Ask),
        other => Err(format!("expected default, yes, no or ask (got '{other}')")),
    }
}
