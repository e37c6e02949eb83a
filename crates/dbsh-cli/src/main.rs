//! dbsh, an interactive SQL shell.
//!
//! Connects to a database, reads `;`-terminated statements and prints their
//! results. Statements starting with `!` are expressions evaluated against
//! the live session instead of being sent to the database.
//!
//! # Usage
//!
//! ```bash
//! # Interactive session against a SQLite file
//! dbsh --url sqlite:app.db --user admin --password secret
//!
//! # Run a script, recording an HTML transcript
//! dbsh --url sqlite:app.db --user admin --password secret -f setup.sql --record nightly
//!
//! # Print a properties template
//! dbsh --print-template > dbsh.properties
//! ```

use std::fs::File;
use std::io::{self, BufReader, IsTerminal};
use std::path::Path;
use std::process::ExitCode;
use std::thread;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::signal;
use tracing::{error, info, warn};

mod config;
mod error;
mod eval;
mod logging;
mod options;
mod reader;
mod render;
mod repl;
mod session;
mod transcript;
mod transform;

use config::{ConfigResolver, Configuration, Resolution, TerminalPrompter};
use error::ShellError;
use logging::LogHandle;
use reader::{BufReadSource, EditorSource, LineSource};
use repl::Shell;
use session::{CloseStatus, Resources, Session};
use transcript::Transcript;
use transform::TransformerRegistry;

/// Exit status after a termination signal.
const INTERRUPTED: i32 = 130;

fn main() -> ExitCode {
    // Installed before resolution so property-file warnings are not lost.
    let log_handle = match logging::init_logging(false) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut transformers = TransformerRegistry::new();
    let mut prompter = TerminalPrompter;
    let resolution = ConfigResolver::new(&mut transformers, &mut prompter)
        .with_default_properties(ConfigResolver::user_properties_path())
        .resolve(std::env::args().skip(1));

    let config = match resolution {
        Ok(Resolution::Run(config)) => config,
        Ok(Resolution::Usage(text)) | Ok(Resolution::Template(text)) => {
            println!("{}", text);
            return ExitCode::SUCCESS;
        }
        Err(e @ ShellError::Argument(_)) => {
            eprintln!("{}\n\n{}", e, config::usage());
            return ExitCode::from(2);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = log_handle.set_debug(config.debug()) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    match run(config, transformers, log_handle) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Configuration, transformers: TransformerRegistry, log_handle: LogHandle) -> Result<()> {
    let mut session = Session::new(config, transformers).with_log_handle(log_handle);
    if let Some(record_id) = session.config().record().map(str::to_string) {
        let transcript = Transcript::open(Path::new("."), &record_id, Local::now())
            .context("failed to open transcript")?;
        if let Some(path) = transcript.path() {
            println!("recording to {}", path.display());
        }
        session = session.with_transcript(transcript);
    }
    install_shutdown_handler(session.resources())?;

    match session.connect_configured() {
        Ok(conn) => println!(
            "connected to {} as {} ({}) in {}ms",
            conn.url,
            conn.user,
            conn.driver,
            conn.elapsed.as_millis()
        ),
        Err(e) => {
            error!(error = %e, "startup connection failed");
            session.close();
            return Err(e).context("could not connect");
        }
    }

    if let Some(path) = session.config().file().map(Path::to_path_buf) {
        info!(path = %path.display(), "running script");
        let file = File::open(&path).with_context(|| format!("cannot open {}", path.display()))?;
        return run_shell(session, BufReadSource::new(BufReader::new(file)));
    }
    if io::stdin().is_terminal() {
        let editor = EditorSource::new().context("failed to start line editor")?;
        return run_shell(session, editor);
    }
    run_shell(session, BufReadSource::new(io::stdin().lock()))
}

fn run_shell<S: LineSource>(session: Session, source: S) -> Result<()> {
    let stdout = io::stdout();
    let mut shell = Shell::new(session, source, stdout.lock());
    shell.run()?;
    info!(state = ?shell.state(), "shell closed");
    Ok(())
}

/// Closes the connection and transcript, then exits, when the process is
/// interrupted or terminated.
fn install_shutdown_handler(resources: Resources) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    thread::Builder::new()
        .name("dbsh-signal".to_string())
        .spawn(move || {
            if let Err(e) = runtime.block_on(shutdown_signal()) {
                error!(error = %e, "failed to listen for termination signals");
                return;
            }
            warn!("termination signal received, closing session");
            if resources.release() == CloseStatus::AlreadyClosed {
                info!("nothing left to close");
            }
            std::process::exit(INTERRUPTED);
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

async fn shutdown_signal() -> io::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())?
            .recv()
            .await;
        Ok::<(), io::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<io::Result<()>>();

    tokio::select! {
        result = ctrl_c => result,
        result = terminate => result,
    }
}
