//! The request block sent once at the start of every session.
//!
//! ```text
//! Cwd: /home/u
//! Cookie: abc123
//! Arg: -e
//! Arg: print 1+1
//! Cp: lib/a.jar
//! Env: LANG=C
//!
//! ```

use std::env;

use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::options::ClientOptions;
use crate::protocol::header::MAX_VALUE_BYTES;
use crate::protocol::{
    HeaderBlock, OutboundFrame, KEY_ARG, KEY_CLASSPATH, KEY_COOKIE, KEY_CWD, KEY_ENV,
};
use crate::session::ConnectionWriter;
use crate::{AppError, Result};

/// Selection of environment variables forwarded to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvMask {
    /// Forward names containing any of these substrings.
    pub include: Vec<String>,
    /// Never forward names containing any of these substrings.
    pub exclude: Vec<String>,
    /// Forward everything not excluded.
    pub all: bool,
}

impl EnvMask {
    /// `true` when no variable can be selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.all && self.include.is_empty()
    }

    /// Whether the variable `name` is forwarded.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        if self.exclude.iter().any(|pat| name.contains(pat.as_str())) {
            return false;
        }
        self.all || self.include.iter().any(|pat| name.contains(pat.as_str()))
    }

    /// Pick the forwarded variables out of `vars`, sorted by name.
    ///
    /// Variables whose value spans several lines, or whose `NAME=VALUE` form
    /// exceeds [`MAX_VALUE_BYTES`], cannot be carried in a header and are
    /// dropped with a warning.
    pub fn select<I>(&self, vars: I) -> Vec<(String, String)>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if self.is_empty() {
            return Vec::new();
        }
        let mut selected: Vec<(String, String)> = vars
            .into_iter()
            .filter(|(name, _)| self.matches(name))
            .filter(|(name, value)| {
                if value.contains(['\n', '\r']) {
                    warn!(name = %name, "not forwarding multi-line environment variable");
                    return false;
                }
                if name.len() + 1 + value.len() > MAX_VALUE_BYTES {
                    warn!(
                        name = %name,
                        "not forwarding environment variable over the header size limit"
                    );
                    return false;
                }
                true
            })
            .collect();
        selected.sort();
        selected
    }
}

impl From<&ClientOptions> for EnvMask {
    fn from(options: &ClientOptions) -> Self {
        Self {
            include: options.env_include.clone(),
            exclude: options.env_exclude.clone(),
            all: options.env_all,
        }
    }
}

/// Initial request frame: who is asking, from where, to run what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    cwd: String,
    cookie: String,
    args: Vec<String>,
    classpath: Option<String>,
    env: Vec<(String, String)>,
}

impl Request {
    /// Request with the mandatory fields and no arguments.
    #[must_use]
    pub fn new(cwd: impl Into<String>, cookie: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            cookie: cookie.into(),
            args: Vec::new(),
            classpath: None,
            env: Vec::new(),
        }
    }

    /// Append positional arguments, preserving order.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the classpath header; `None` omits it.
    #[must_use]
    pub fn with_classpath(mut self, classpath: Option<String>) -> Self {
        self.classpath = classpath;
        self
    }

    /// Set the forwarded environment variables.
    #[must_use]
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Build the request from the running process: its working directory,
    /// the configured classpath variable, and the environment selected by
    /// `mask`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the working directory cannot be determined
    /// or is not valid UTF-8.
    pub fn from_environment(
        cookie: String,
        args: Vec<String>,
        config: &ClientConfig,
        mask: &EnvMask,
    ) -> Result<Self> {
        let cwd = env::current_dir()
            .map_err(|err| AppError::Io(format!("getcwd: {err}")))?
            .into_os_string()
            .into_string()
            .map_err(|raw| {
                AppError::Io(format!("working directory is not valid UTF-8: {raw:?}"))
            })?;

        let classpath = env::var(&config.classpath_env)
            .ok()
            .filter(|cp| !cp.is_empty());
        let forwarded = mask.select(env::vars_os().filter_map(|(name, value)| {
            Some((name.into_string().ok()?, value.into_string().ok()?))
        }));

        Ok(Self::new(cwd, cookie)
            .with_args(args)
            .with_classpath(classpath)
            .with_env(forwarded))
    }

    /// Header block in wire order: `Cwd`, `Cookie`, `Arg`*, `Cp`?, `Env`*.
    #[must_use]
    pub fn to_block(&self) -> HeaderBlock {
        let mut block = HeaderBlock::new();
        block.push(KEY_CWD, self.cwd.as_str());
        block.push(KEY_COOKIE, self.cookie.as_str());
        for arg in &self.args {
            block.push(KEY_ARG, arg.as_str());
        }
        if let Some(cp) = &self.classpath {
            block.push(KEY_CLASSPATH, cp.as_str());
        }
        for (name, value) in &self.env {
            block.push(KEY_ENV, format!("{name}={value}"));
        }
        block
    }

    /// Write the request to the connection as a single frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if a value contains a line break or is
    /// longer than [`MAX_VALUE_BYTES`], and `AppError::Io` if the write fails.
    pub async fn send<W>(&self, writer: &ConnectionWriter<W>) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let block = self.to_block();
        debug!(
            headers = block.len(),
            args = self.args.len(),
            env = self.env.len(),
            "sending request"
        );
        writer.send(OutboundFrame::Request(block)).await
    }
}
