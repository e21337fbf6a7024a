mod attach;
mod config;
mod error;
mod keeper;
mod logging;
mod models;
mod persistence;
mod pty;
mod store;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use attach::{spawn_stdin_reader, AttachLoop, AttachOutcome, CommandDecoder, InputPump};
use config::Config;
use error::{Error, ErrorKind};
use keeper::{DetachHook, ReexecKeeper};
use models::{current_user, Session};
use store::{lock_session, SessionStore};

#[derive(Parser)]
#[command(name = "rescreen")]
#[command(version)]
#[command(about = "Terminal multiplexer whose sessions survive detaching, without a server")]
#[command(disable_help_flag = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    overrides: Overrides,

    /// Print help
    #[arg(long, action = ArgAction::Help, global = true)]
    help: Option<bool>,
}

/// Flags that take precedence over the config file.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Config file to read instead of the default one
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Command and literal key, e.g. ^Aa
    #[arg(short = 'e', long, global = true)]
    escape: Option<String>,

    /// Scrollback lines per window
    #[arg(short = 'h', long, global = true)]
    scrollback: Option<usize>,

    /// TERM for new windows
    #[arg(short = 'T', long, global = true)]
    term: Option<String>,

    /// Run windows in UTF-8 mode
    #[arg(short = 'U', long, global = true)]
    utf8: bool,

    /// Flow control: on, off or auto
    #[arg(short = 'f', long = "flow", global = true, value_parser = ["on", "off", "auto"])]
    flow: Option<String>,

    /// Interrupt output immediately when flow control stops it
    #[arg(short = 'i', long, global = true)]
    interrupt: bool,

    /// Optimal output mode
    #[arg(short = 'O', long, global = true)]
    optimal: bool,

    /// Log window output to this file (%n is the window number)
    #[arg(short = 'L', long = "logfile", global = true)]
    logfile: Option<String>,

    /// Program for new windows
    #[arg(short = 's', long, global = true)]
    shell: Option<String>,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(escape) = &self.escape {
            config.escape = escape.clone();
        }
        if let Some(scrollback) = self.scrollback {
            config.scrollback = scrollback;
        }
        if let Some(term) = &self.term {
            config.term = term.clone();
        }
        if let Some(flow) = &self.flow {
            config.flow_control = flow.clone();
        }
        if let Some(logfile) = &self.logfile {
            config.log_file = logfile.clone();
        }
        if let Some(shell) = &self.shell {
            config.shell = shell.clone();
        }
        config.utf8 |= self.utf8;
        config.interrupt |= self.interrupt;
        config.optimal_output |= self.optimal;
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new session
    New {
        /// Session name
        #[arg(short = 'S')]
        name: Option<String>,
        /// Start detached
        #[arg(short = 'd')]
        detached: bool,
        /// Program and arguments for the first window
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Reattach to a detached session
    #[command(short_flag = 'r', visible_alias = "reattach")]
    Attach {
        /// Session name; may be left out when only one session is resumable
        name: Option<String>,
    },
    /// List sessions
    #[command(visible_alias = "list")]
    Ls,
    /// Kill every window of a session and remove it
    Kill { name: String },
    /// Remove records of dead sessions
    Wipe,
    /// Rename a session
    Rename { old: String, new: String },
    /// Manage who may attach to a session
    Acl {
        #[command(subcommand)]
        action: AclAction,
    },
}

#[derive(Subcommand)]
enum AclAction {
    /// Allow a user to attach
    Add { name: String, user: String },
    /// Revoke a user's access
    Remove { name: String, user: String },
}

fn main() -> ExitCode {
    // A keeper never returns from here.
    keeper::run_if_requested();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("rescreen: {e:#}");
            exit_code(&e)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.overrides.config.as_deref())?;
    cli.overrides.apply(&mut config);

    let registry_dir = persistence::registry_dir(config.registry_dir().as_deref());
    let _log_guard = match logging::init(&logging::state_dir(&registry_dir)) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("rescreen: logging disabled: {e:#}");
            None
        }
    };
    let store = Arc::new(SessionStore::open(registry_dir));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    runtime.block_on(async move {
        match cli.command {
            None => new_session(store, &config, None, false, Vec::new()).await,
            Some(Commands::New {
                name,
                detached,
                command,
            }) => new_session(store, &config, name, detached, command).await,
            Some(Commands::Attach { name }) => reattach(store, &config, name).await,
            Some(Commands::Ls) => {
                list_sessions(&store);
                Ok(())
            }
            Some(Commands::Kill { name }) => {
                store.load(&name)?;
                store.delete(&name)?;
                Ok(())
            }
            Some(Commands::Wipe) => {
                let removed = store.cleanup_orphans()?;
                println!("{} dead session(s) removed.", removed.len());
                Ok(())
            }
            Some(Commands::Rename { old, new }) => {
                store.load(&old)?;
                store.rename(&old, &new)?;
                Ok(())
            }
            Some(Commands::Acl { action }) => {
                match action {
                    AclAction::Add { name, user } => {
                        store.load(&name)?;
                        store.add_user(&name, &user)?;
                    }
                    AclAction::Remove { name, user } => {
                        store.load(&name)?;
                        store.remove_user(&name, &user)?;
                    }
                }
                Ok(())
            }
        }
    })
}

async fn new_session(
    store: Arc<SessionStore>,
    config: &Config,
    name: Option<String>,
    detached: bool,
    command: Vec<String>,
) -> Result<()> {
    let id = name.unwrap_or_else(models::default_session_name);
    let (program, args) = match command.split_first() {
        Some((program, args)) => (program.clone(), args.to_vec()),
        None => (config.shell(), Vec::new()),
    };

    let attach_config = config.attach_config(attach::terminal_size());
    store.create(&id, &program, &args, &attach_config.session)?;

    if detached {
        let hook = DetachHook::new(Box::new(ReexecKeeper::current_exe()?));
        hook.fire(&id, &store.master_fds(&id));
        store.persist(&id)?;
        store.force_detach(&id)?;
        return Ok(());
    }

    attach_to(store, &id, config).await
}

async fn reattach(store: Arc<SessionStore>, config: &Config, name: Option<String>) -> Result<()> {
    let id = match name {
        Some(name) => name,
        None => pick_resumable(&store)?,
    };

    let session = store.load(&id)?;
    let user = current_user();
    if !lock_session(&session).can_attach(&user) {
        return Err(Error::PermissionDenied { user, session: id }.into());
    }
    attach_to(store, &id, config).await
}

/// The only detached session with a live window, if there is exactly one.
fn pick_resumable(store: &SessionStore) -> Result<String> {
    let candidates: Vec<Session> = store
        .registry()
        .load_all()?
        .into_iter()
        .filter(Session::has_alive_window)
        .collect();

    match candidates.as_slice() {
        [] => Err(Error::NotFound("resumable session".to_string()).into()),
        [only] => Ok(only.id.clone()),
        several => {
            eprintln!("There are several suitable sessions:");
            for session in several {
                eprintln!("\t{}\t({})", session.id, attach::describe(session));
            }
            Err(Error::Unavailable("name the session to resume: rescreen attach <name>".to_string()).into())
        }
    }
}

async fn attach_to(store: Arc<SessionStore>, id: &str, config: &Config) -> Result<()> {
    let attach_config = config.attach_config(attach::terminal_size());
    let hook = DetachHook::new(Box::new(
        ReexecKeeper::current_exe().map_err(|e| attach_failure(id, e))?,
    ));
    let input = InputPump::new(spawn_stdin_reader(), CommandDecoder::new(config.decoder_config()));

    let outcome = AttachLoop::new(store, id, attach_config, hook)
        .run(input)
        .await
        .map_err(|e| attach_failure(id, e))?;
    match outcome {
        AttachOutcome::Detached => println!("[detached from {id}]"),
        AttachOutcome::Ended => println!("[session {id} is terminating]"),
    }
    Ok(())
}

/// Name the session and the classified reason; the typed error stays
/// reachable for the exit status.
fn attach_failure(id: &str, err: Error) -> anyhow::Error {
    let kind = err.kind();
    anyhow::Error::new(err).context(format!("attach to session {id} failed ({kind})"))
}

fn list_sessions(store: &SessionStore) {
    // Records only: listing must not reopen anyone's slave devices.
    let sessions = match store.registry().load_all() {
        Ok(sessions) => sessions,
        Err(e) => {
            tracing::warn!("ls: could not read registry: {e}");
            Vec::new()
        }
    };
    if sessions.is_empty() {
        println!("No sessions in {}.", store.registry().dir().display());
        return;
    }
    for session in &sessions {
        println!(
            "\t{}\t({})\t{} window(s)\t{}",
            session.id,
            attach::describe(session),
            session.windows.len(),
            session.created_at.format("%Y-%m-%d %H:%M"),
        );
    }
    println!("{} session(s) in {}.", sessions.len(), store.registry().dir().display());
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    let kind = err.downcast_ref::<Error>().map(Error::kind);
    ExitCode::from(exit_status(kind))
}

fn exit_status(kind: Option<ErrorKind>) -> u8 {
    match kind {
        Some(ErrorKind::NotFound) => 2,
        Some(ErrorKind::PermissionDenied) => 3,
        Some(ErrorKind::ResourceExhausted) => 4,
        Some(ErrorKind::Fatal) => 130,
        _ => 1,
    }
}
