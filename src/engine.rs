//! Engine process lifecycle management.
//!
//! [`Engine`] owns the engine child process: it builds the launch command,
//! parses the connection handshake the engine prints to standard output
//! (endpoint on the first non-empty line, shared secret on the second),
//! hands out [`Session`]s, and guarantees the child is terminated on every
//! host exit path.
//!
//! # Process Cleanup Safety
//!
//! The child is spawned with `kill_on_drop` and `Drop` additionally issues
//! the kill eagerly, so panics and early returns never leak an engine
//! process. [`Engine::shutdown`] is the graceful path: it opens a
//! throw-away control session, sends `quit.`, and waits for the engine to
//! exit before falling back to a kill.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::MqiError;
use crate::session::Session;
use crate::transport::Endpoint;

/// Default startup window for the stdout handshake.
const DEFAULT_STARTUP_TIMEOUT_SECS: f64 = 5.0;

/// How long the graceful `quit` exchange may take.
const QUIT_WINDOW: Duration = Duration::from_secs(2);

/// How long to wait for the child to exit after `quit` before killing it.
const EXIT_WINDOW: Duration = Duration::from_secs(2);

/// Configuration for launching (or attaching to) an engine.
///
/// All knobs are optional; `EngineConfig::default()` launches a freshly
/// discovered engine on an engine-chosen loopback port with an
/// engine-generated secret:
///
/// ```ignore
/// let engine = Engine::launch(EngineConfig::default()).await?;
/// let mut session = engine.open_session().await?;
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Spawn the engine child. When false, attach to an already-running
    /// MQI server instead; an endpoint and `password` are then mandatory.
    pub launch: bool,
    /// Override the discovered engine executable. Defaults to the
    /// `PROLOG_PATH` environment variable, then `swipl` on `PATH`.
    pub engine_executable_path: Option<PathBuf>,
    /// Extra engine arguments inserted before the `--` separator.
    /// Defaults to the whitespace-split `PROLOG_ARGS` environment
    /// variable.
    pub engine_args: Option<Vec<String>>,
    /// Pin the engine to an explicit loopback port. Default: the engine
    /// picks a free port and reports it in the handshake.
    pub port: Option<u16>,
    /// Pre-shared secret. Default: the engine generates one and reports
    /// it in the handshake.
    pub password: Option<String>,
    /// Use a Unix domain socket instead of TCP (unix platforms only).
    pub use_unix_socket: bool,
    /// Override the generated socket path. Implies `use_unix_socket`.
    pub unix_socket_path: Option<PathBuf>,
    /// Default per-query timeout in seconds; negative means unlimited.
    /// Passed to the engine and used as the session default.
    pub query_timeout_seconds: Option<f64>,
    /// Maximum number of pending connections the engine will accept.
    pub pending_connections: Option<u32>,
    /// Redirect engine stdout/stderr to this file instead of the captured
    /// pipe.
    pub output_file_name: Option<PathBuf>,
    /// Startup window for the handshake, in seconds.
    pub startup_timeout_seconds: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            launch: true,
            engine_executable_path: None,
            engine_args: None,
            port: None,
            password: None,
            use_unix_socket: false,
            unix_socket_path: None,
            query_timeout_seconds: None,
            pending_connections: None,
            output_file_name: None,
            startup_timeout_seconds: DEFAULT_STARTUP_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    /// Reject configurations that cannot work before any process is
    /// spawned.
    fn validate(&self) -> Result<(), MqiError> {
        if self.use_unix_socket || self.unix_socket_path.is_some() {
            #[cfg(not(unix))]
            return Err(MqiError::InvalidState(
                "unix domain sockets are not supported on this platform".to_string(),
            ));
            #[cfg(unix)]
            if self.port.is_some() {
                return Err(MqiError::InvalidState(
                    "cannot specify both a port and a unix domain socket".to_string(),
                ));
            }
        }

        if !self.launch {
            if self.output_file_name.is_some() {
                return Err(MqiError::InvalidState(
                    "output_file_name only applies when launching the engine".to_string(),
                ));
            }
            if self.password.is_none() {
                return Err(MqiError::InvalidState(
                    "a password is required when attaching to a running engine".to_string(),
                ));
            }
            if self.port.is_none() && self.unix_socket_path.is_none() {
                return Err(MqiError::InvalidState(
                    "a port or unix socket path is required when attaching".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The engine executable to invoke.
    ///
    /// Search order: explicit config, the `PROLOG_PATH` environment
    /// variable, standard install locations, then plain `swipl` so `PATH`
    /// gets the last word.
    fn resolve_executable(&self) -> PathBuf {
        if let Some(path) = &self.engine_executable_path {
            return path.clone();
        }
        if let Ok(path) = std::env::var("PROLOG_PATH") {
            if !path.trim().is_empty() {
                debug!("using engine executable from PROLOG_PATH: {}", path);
                return PathBuf::from(path);
            }
        }
        for candidate in [
            "/usr/local/bin/swipl",
            "/usr/bin/swipl",
            "/opt/homebrew/bin/swipl",
        ] {
            let candidate = Path::new(candidate);
            if candidate.is_file() {
                debug!("found engine executable at {}", candidate.display());
                return candidate.to_path_buf();
            }
        }
        PathBuf::from("swipl")
    }

    /// Extra engine arguments: explicit config first, then `PROLOG_ARGS`.
    fn resolve_extra_args(&self) -> Vec<String> {
        if let Some(args) = &self.engine_args {
            return args.clone();
        }
        match std::env::var("PROLOG_ARGS") {
            Ok(raw) => raw.split_whitespace().map(String::from).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Connection state shared between the engine handle and its sessions.
///
/// Sessions hold this through an `Arc` as a non-owning back-link; the
/// child process itself is owned exclusively by [`Engine`].
#[derive(Debug)]
pub(crate) struct EngineShared {
    pub(crate) endpoint: Endpoint,
    pub(crate) password: String,
    pub(crate) query_timeout: Option<f64>,
    connection_failed: AtomicBool,
}

impl EngineShared {
    /// Record that the engine-level connection is gone (engine quit or
    /// reported `connection_failed`); no further sessions will be opened.
    pub(crate) fn mark_connection_failed(&self) {
        self.connection_failed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_connection_failed(&self) -> bool {
        self.connection_failed.load(Ordering::SeqCst)
    }
}

/// Handle to one engine process (or to an externally managed MQI server
/// in attach mode).
///
/// At most one live handle exists per spawned process: the handle owns the
/// child exclusively, and dropping it terminates the child.
#[derive(Debug)]
pub struct Engine {
    shared: Arc<EngineShared>,
    child: Option<Child>,
    /// Socket file to remove on drop; set only for engines we launched
    /// over a Unix domain socket.
    owned_socket_path: Option<PathBuf>,
}

impl Engine {
    /// Launch an engine per `config`, or attach to a running one when
    /// `config.launch` is false.
    ///
    /// # Errors
    ///
    /// `InvalidState` for contradictory configuration, `LaunchFailed` if
    /// the child cannot be spawned or does not print its connection
    /// values within the startup window.
    pub async fn launch(config: EngineConfig) -> Result<Engine, MqiError> {
        config.validate()?;
        if !config.launch {
            return Engine::attach(&config);
        }

        let exe = config.resolve_executable();
        let uds_mode = config.use_unix_socket || config.unix_socket_path.is_some();
        let socket_path = if uds_mode {
            Some(match &config.unix_socket_path {
                Some(path) => path.clone(),
                None => generated_socket_path()
                    .map_err(|e| MqiError::LaunchFailed(format!("cannot create socket dir: {}", e)))?,
            })
        } else {
            None
        };

        let args = build_command_args(&config, socket_path.as_deref());
        debug!("launching engine: {} {}", exe.display(), args.join(" "));

        let mut child = Command::new(&exe)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MqiError::LaunchFailed(format!("failed to spawn {}: {}", exe.display(), e))
            })?;
        info!("launched engine (pid {:?})", child.id());

        let stdout = child.stdout.take().ok_or_else(|| {
            MqiError::LaunchFailed("engine stdout pipe unavailable".to_string())
        })?;
        let mut stdout_lines = BufReader::new(stdout).lines();

        let window = Duration::from_secs_f64(config.startup_timeout_seconds.max(0.0));
        let handshake = timeout(window, read_connection_values(&mut stdout_lines)).await;
        let (endpoint_line, secret) = match handshake {
            Ok(Ok(values)) => values,
            Ok(Err(e)) => {
                reap(&mut child).await;
                return Err(e);
            }
            Err(_) => {
                reap(&mut child).await;
                return Err(MqiError::LaunchFailed(format!(
                    "engine did not print connection values within {:?}",
                    window
                )));
            }
        };

        let endpoint = parse_endpoint(uds_mode, &endpoint_line)?;
        info!("engine ready at {}", endpoint);

        // Keep draining child output so the pipes never fill, tagging each
        // line with its stream of origin.
        spawn_output_drain(stdout_lines, "stdout");
        if let Some(stderr) = child.stderr.take() {
            spawn_output_drain(BufReader::new(stderr).lines(), "stderr");
        }

        Ok(Engine {
            shared: Arc::new(EngineShared {
                endpoint,
                password: secret,
                query_timeout: config.query_timeout_seconds,
                connection_failed: AtomicBool::new(false),
            }),
            child: Some(child),
            owned_socket_path: socket_path,
        })
    }

    /// Attach to an already-running MQI server. Validation has ensured an
    /// endpoint and password are present.
    fn attach(config: &EngineConfig) -> Result<Engine, MqiError> {
        let endpoint = match (&config.unix_socket_path, config.port) {
            #[cfg(unix)]
            (Some(path), _) => Endpoint::Unix(path.clone()),
            (None, Some(port)) => Endpoint::Tcp(port),
            _ => {
                return Err(MqiError::InvalidState(
                    "attach requires a port or unix socket path".to_string(),
                ))
            }
        };
        let password = config.password.clone().ok_or_else(|| {
            MqiError::InvalidState("attach requires a password".to_string())
        })?;

        info!("attaching to running engine at {}", endpoint);
        Ok(Engine {
            shared: Arc::new(EngineShared {
                endpoint,
                password,
                query_timeout: config.query_timeout_seconds,
                connection_failed: AtomicBool::new(false),
            }),
            child: None,
            owned_socket_path: None,
        })
    }

    /// Open a new session on this engine. Sessions are independent and may
    /// run truly in parallel.
    pub async fn open_session(&self) -> Result<Session, MqiError> {
        if self.shared.is_connection_failed() {
            return Err(MqiError::InvalidState(
                "the engine connection has failed; no new sessions can be opened".to_string(),
            ));
        }
        Session::connect(Arc::clone(&self.shared)).await
    }

    /// The endpoint this engine accepts connections on.
    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    /// Process id of the engine child, if we launched one and it has not
    /// been waited on.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Gracefully shut the engine down: `quit.` on a throw-away control
    /// session, then wait for the child, then kill it if it lingers.
    ///
    /// In attach mode this only releases the handle; the external server
    /// keeps running.
    pub async fn shutdown(mut self) -> Result<(), MqiError> {
        if let Some(mut child) = self.child.take() {
            if !self.shared.is_connection_failed() {
                match timeout(QUIT_WINDOW, self.quit_gracefully()).await {
                    Ok(Ok(())) => debug!("engine acknowledged quit"),
                    Ok(Err(e)) => warn!("graceful quit failed: {}", e),
                    Err(_) => warn!("graceful quit timed out"),
                }
            }

            match timeout(EXIT_WINDOW, child.wait()).await {
                Ok(Ok(status)) => info!("engine exited with {}", status),
                Ok(Err(e)) => warn!("error waiting for engine exit: {}", e),
                Err(_) => {
                    warn!("engine still alive after quit; killing");
                    if let Err(e) = child.kill().await {
                        warn!("failed to kill engine: {}", e);
                    }
                }
            }
        }
        self.remove_socket_file();
        Ok(())
    }

    async fn quit_gracefully(&self) -> Result<(), MqiError> {
        let mut control = Session::connect(Arc::clone(&self.shared)).await?;
        control.quit().await
    }

    /// Remove the socket file we caused to be created, if any.
    fn remove_socket_file(&mut self) {
        if let Some(path) = self.owned_socket_path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("removed socket file {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove socket file {}: {}", path.display(), e),
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(child) = &mut self.child {
            // kill_on_drop already backstops this; issue the kill eagerly
            // so the child is gone even if the runtime never polls again.
            match child.start_kill() {
                Ok(()) => debug!("killed engine child on drop"),
                Err(e) if e.kind() == io::ErrorKind::InvalidInput => {} // already exited
                Err(e) => warn!("failed to kill engine child on drop: {}", e),
            }
        }
        self.remove_socket_file();
    }
}

/// Kill and reap a child whose launch failed part-way.
async fn reap(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Assemble the engine argv: startup goal, extra engine args, then the
/// MQI flags after the `--` separator.
fn build_command_args(config: &EngineConfig, socket_path: Option<&Path>) -> Vec<String> {
    let mut args: Vec<String> = ["--quiet", "-g", "mqi_start", "-t", "halt"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(config.resolve_extra_args());
    args.push("--".to_string());
    args.push("--write_connection_values=true".to_string());

    if let Some(port) = config.port {
        args.push(format!("--port={}", port));
    }
    if let Some(password) = &config.password {
        args.push(format!("--password={}", password));
    }
    if let Some(path) = socket_path {
        args.push(format!("--unix_domain_socket={}", path.display()));
    }
    if let Some(t) = config.query_timeout_seconds {
        args.push(format!("--query_timeout={}", t));
    }
    if let Some(n) = config.pending_connections {
        args.push(format!("--pending_connections={}", n));
    }
    if let Some(file) = &config.output_file_name {
        args.push(format!("--write_output_to_file={}", file.display()));
    }
    args
}

/// Read the two non-empty handshake lines (endpoint, then secret) from the
/// child's stdout.
async fn read_connection_values<R>(
    lines: &mut Lines<BufReader<R>>,
) -> Result<(String, String), MqiError>
where
    R: AsyncRead + Unpin,
{
    let endpoint = next_nonempty_line(lines).await?;
    let secret = next_nonempty_line(lines).await?;
    Ok((endpoint, secret))
}

async fn next_nonempty_line<R>(lines: &mut Lines<BufReader<R>>) -> Result<String, MqiError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.is_empty() {
                    return Ok(line.to_string());
                }
            }
            Ok(None) => {
                return Err(MqiError::LaunchFailed(
                    "engine exited before printing its connection values".to_string(),
                ))
            }
            Err(e) => {
                return Err(MqiError::LaunchFailed(format!(
                    "error reading engine stdout: {}",
                    e
                )))
            }
        }
    }
}

/// Interpret the handshake's first line as an endpoint.
#[cfg(unix)]
fn parse_endpoint(uds_mode: bool, line: &str) -> Result<Endpoint, MqiError> {
    if uds_mode {
        Ok(Endpoint::Unix(PathBuf::from(line)))
    } else {
        parse_tcp_endpoint(line)
    }
}

#[cfg(not(unix))]
fn parse_endpoint(uds_mode: bool, line: &str) -> Result<Endpoint, MqiError> {
    debug_assert!(!uds_mode, "uds rejected by config validation");
    parse_tcp_endpoint(line)
}

fn parse_tcp_endpoint(line: &str) -> Result<Endpoint, MqiError> {
    line.parse::<u16>().map(Endpoint::Tcp).map_err(|_| {
        MqiError::LaunchFailed(format!("engine printed an unparseable port: '{}'", line))
    })
}

/// Generate a private, unique socket path for this process.
#[cfg(unix)]
fn generated_socket_path() -> io::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::AtomicU64;

    static SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);

    let base = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
    let dir = base.join("prolog-mqi");
    std::fs::create_dir_all(&dir)?;
    // Only the launching user may reach sockets under this directory.
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;

    let seq = SOCKET_SEQ.fetch_add(1, Ordering::Relaxed);
    Ok(dir.join(format!("mqi-{}-{}.sock", std::process::id(), seq)))
}

#[cfg(not(unix))]
fn generated_socket_path() -> io::Result<PathBuf> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "unix domain sockets are not supported on this platform",
    ))
}

/// Re-log every remaining child output line, tagged with its stream.
fn spawn_output_drain<R>(mut lines: Lines<BufReader<R>>, origin: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!("engine {}: {}", origin, line),
                Ok(None) => break,
                Err(e) => {
                    debug!("error draining engine {}: {}", origin, e);
                    break;
                }
            }
        }
    });
}
