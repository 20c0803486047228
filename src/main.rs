use std::{error::Error, fmt::Write as _, path::PathBuf, process, str::FromStr, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, LevelFilter};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::oneshot,
};
use url::Url;

use spotnet::{
    config::Config,
    error::Error as SpotnetError,
    node::{NodeId, TrackRef},
    remote::Request,
    session::{Handle, Session, View},
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// How long to wait for the master to acknowledge a close on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Websocket URL of the master
    ///
    /// Overrides the URL in the configuration file.
    #[arg(short, long, value_name = "URL", value_hint = ValueHint::Url, env = "SPOTNET_MASTER_URL")]
    master_url: Option<Url>,

    /// Reconnect when the channel to the master ends
    #[arg(long, default_value_t = false)]
    reconnect: bool,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// One line of console input.
#[derive(Debug, PartialEq, Eq)]
enum Line {
    List,
    Quit,
    Request(Request),
}

impl FromStr for Line {
    type Err = SpotnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = s.split_whitespace().collect();
        let usage = || {
            SpotnetError::invalid_argument(
                "commands: list | login <id> <name> <username> <password> \
                 | add <id> current|next <track-id> <uri> | remove <id> <position> \
                 | play <id> | pause <id> | skip <id> | vote <id> | quit",
            )
        };

        let line = match words.as_slice() {
            ["list"] => Self::List,
            ["quit"] => Self::Quit,
            ["login", node, name, username, password] => Self::Request(Request::SubmitCredentials {
                id: node.parse::<NodeId>()?,
                name: (*name).to_owned(),
                username: (*username).to_owned(),
                password: (*password).to_owned(),
            }),
            ["add", node, position, track_id, uri] => Self::Request(Request::AddTrack {
                id: node.parse::<NodeId>()?,
                position: position.parse()?,
                track: TrackRef::new(*track_id, *uri),
            }),
            ["remove", node, position] => Self::Request(Request::RemoveTrack {
                id: node.parse::<NodeId>()?,
                position: position
                    .parse::<usize>()
                    .map_err(SpotnetError::invalid_argument)?,
            }),
            ["play", node] => Self::Request(Request::Play(node.parse::<NodeId>()?)),
            ["pause", node] => Self::Request(Request::Pause(node.parse::<NodeId>()?)),
            ["skip", node] => Self::Request(Request::Skip(node.parse::<NodeId>()?)),
            ["vote", node] => Self::Request(Request::VoteForSkip(node.parse::<NodeId>()?)),
            _ => return Err(usage()),
        };

        Ok(line)
    }
}

/// Renders the session state for the `list` command.
fn render(view: &View) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}{}, voting {}, {} votes for skip",
        view.sync_state,
        if view.is_stale { " (stale)" } else { "" },
        if view.config.voting_enabled { "on" } else { "off" },
        view.config.votes_required_for_skip
    );

    for (title, nodes) in [
        ("connected", view.connected_nodes().collect::<Vec<_>>()),
        ("idle", view.idle_nodes().collect()),
    ] {
        let _ = writeln!(out, "{title}:");
        for node in nodes {
            let _ = writeln!(out, "  {node}");
            if let Some(track) = node.now_playing() {
                let _ = writeln!(out, "    now playing: {track}");
            }
            for (index, track) in node.coming_up().iter().enumerate() {
                let _ = writeln!(out, "    {index}: {track}");
            }
        }
    }

    out
}

/// Reads console commands from stdin until `quit` or end of input.
async fn console(handle: Handle, quit: oneshot::Sender<()>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("error reading console: {e}");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<Line>() {
            Ok(Line::List) => match handle.view().await {
                Ok(view) => print!("{}", render(&view)),
                Err(e) => error!("{e}"),
            },
            Ok(Line::Quit) => break,
            Ok(Line::Request(request)) => {
                if let Err(e) = handle.execute(request).await {
                    println!("{e}");
                }
            }
            Err(e) => println!("{e}"),
        }
    }

    let _ = quit.send(());
}

/// Main application loop.
///
/// # Errors
///
/// This function returns an error when the configuration is invalid, or
/// when the master cannot be reached and reconnecting is disabled.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load(args.config.as_deref(), args.master_url.clone())?;
    config.reconnect |= args.reconnect;

    let mut session = Session::new(config.clone());

    let mut changes = session.subscribe();
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            info!("{change}");
        }
    });

    let (quit_tx, mut quit_rx) = oneshot::channel();
    tokio::spawn(console(session.handle(), quit_tx));

    // The initial connection happens immediately.
    let mut restart_delay = Duration::ZERO;

    // Main application loop. A new channel is opened after the previous one
    // ended, but only when reconnecting is enabled. Console commands during
    // the delay fail with a transport error.
    loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down gracefully");
                break;
            }

            _ = &mut quit_rx => {
                info!("shutting down");
                break;
            }

            result = session.run_after(restart_delay) => {
                match result {
                    Ok(state) => debug!("session ended: {state}"),
                    Err(e) if config.reconnect => error!("{e}"),
                    Err(e) => return Err(e.into()),
                }

                if !config.reconnect {
                    return Ok(());
                }

                restart_delay = config.restart_delay();
                info!("reconnecting in {:.1}s", restart_delay.as_secs_f32());
            }
        }
    }

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, session.stop()).await.is_err() {
        debug!("master did not acknowledge close");
    }

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
