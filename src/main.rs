#![forbid(unsafe_code)]

//! `interpc`: run a command on the interpreter server as if it were local.
//!
//! Every argument except the `-C…` client options is forwarded to the server.
//! The exit status is the remote process's status, 0 on a clean hang-up, 1
//! on any local failure or interrupt, and 9 when `-Cwithout-invoking-server`
//! finds the server down.

use std::env;
use std::sync::Arc;

use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use interp_client::cancel::{self, CancelHandler, Interrupt};
use interp_client::config::{ClientConfig, PORT_ENV};
use interp_client::connection::{
    self, CommandLauncher, Connected, LaunchPolicy, PROBE_DOWN_STATUS,
};
use interp_client::cookie::CookieSource;
use interp_client::options::{self, Invocation, LogFormat};
use interp_client::request::{EnvMask, Request};
use interp_client::session::{ConnectionWriter, Session, Terminal};
use interp_client::{AppError, Result};

fn main() {
    let code = match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ERROR: {err}");
            1
        }
    };
    std::process::exit(code);
}

fn try_main() -> Result<i32> {
    let argv = env::args_os()
        .skip(1)
        .map(|arg| {
            arg.into_string()
                .map_err(|raw| AppError::Config(format!("argument is not valid UTF-8: {raw:?}")))
        })
        .collect::<Result<Vec<_>>>()?;
    let invocation = options::parse_invocation(argv)?;

    init_tracing(invocation.options.log_format)?;
    for option in &invocation.ignored {
        warn!(%option, "ignoring unknown client option");
    }

    let config = ClientConfig::load(invocation.options.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let code = runtime.block_on(run(invocation, config));
    // The stdin reader may still be parked in a blocking read.
    runtime.shutdown_background();
    code
}

async fn run(invocation: Invocation, config: ClientConfig) -> Result<i32> {
    let port = config.resolve_port(
        invocation.options.port,
        env::var(PORT_ENV).ok().as_deref(),
    )?;
    let policy = if invocation.options.without_invoking_server {
        LaunchPolicy::ProbeOnly
    } else {
        LaunchPolicy::AutoLaunch(config.startup_policy())
    };
    let launcher = CommandLauncher::from_config(&config);
    debug!(program = %launcher.program().display(), "server launcher resolved");

    let stream = match connection::connect(&config.host, port, policy, &launcher).await? {
        Connected::Stream(stream) => stream,
        Connected::ProbeUp => {
            eprintln!("UP: server is running");
            return Ok(0);
        }
        Connected::ProbeDown => {
            eprintln!("DOWN: server isn't running");
            return Ok(PROBE_DOWN_STATUS);
        }
    };
    info!(host = %config.host, port, "connected");

    let (reader, writer) = stream.into_split();
    let writer = Arc::new(ConnectionWriter::new(writer));
    let mut interrupt = Interrupt::register()?;
    let handler = CancelHandler::new(Arc::clone(&writer));

    let cookie = CookieSource::from_config(&config).load()?;
    let mask = EnvMask::from(&invocation.options);
    let request = Request::from_environment(cookie, invocation.args, &config, &mask)?;
    request.send(&writer).await?;

    let session = Session::new(reader, writer, Terminal::stdio(), config.chunk_size);
    let task = tokio::spawn(session.run());
    let end = cancel::run_until_interrupted(task, interrupt.recv(), &handler).await?;

    info!(?end, "session finished");
    Ok(end.exit_code())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // stdout carries the remote program's output; diagnostics go to stderr.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
