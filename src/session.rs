//! Per-connection session state machine.
//!
//! A session is one client-initiated connection to the engine, backed by a
//! dedicated worker thread on the engine side. It is a half-duplex
//! request/response channel: at most one request is outstanding at any
//! time, enforced here by `&mut self` on every operation.
//!
//! State transitions:
//!
//! ```text
//!    (new) --open--> Handshaking --password ok--> Idle
//!    Idle --run--> SyncPending --reply--> Idle
//!    Idle --run_async--> AsyncRunning --poll/cancel--> ... --> Idle
//!    Idle/Async* --close--> Closed
//!    any --i/o or protocol error--> Broken
//! ```
//!
//! Once `Closed` or `Broken`, every operation fails with
//! `SessionUnavailable`; the engine itself stays up and a new session can
//! be opened.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::engine::EngineShared;
use crate::error::MqiError;
use crate::framing::{read_frame, write_frame};
use crate::term::{QueryResult, Solution, Term};
use crate::transport::Transport;

/// Interval at which the engine emits heartbeat bytes during a long query.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Extra time allowed past a query's own timeout before the client gives
/// up on the read (two heartbeat intervals).
const READ_SLACK: Duration = Duration::from_secs(2 * HEARTBEAT_INTERVAL.as_secs());

/// How long to wait for replies that the engine produces immediately
/// (handshake, acks for `run_async`/`cancel_async`/`close`).
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `quit` waits for the engine's acknowledgment.
const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Life-cycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, password not yet accepted.
    Handshaking,
    /// Ready for a new request.
    Idle,
    /// A synchronous `run` is waiting for its reply.
    SyncPending,
    /// An asynchronous query is running; more answers may come.
    AsyncRunning,
    /// The async query has delivered its answers; only the terminal
    /// exception remains to be drained.
    AsyncDraining,
    /// Cleanly closed; the transport is released.
    Closed,
    /// An I/O or protocol failure invalidated this session.
    Broken,
}

/// Outcome of one [`Session::poll`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// One batch of answers: a single solution per poll in one-at-a-time
    /// mode, the full solution set in find-all mode.
    Solutions(Vec<Solution>),
    /// The goal failed with no solutions.
    False,
    /// No result was ready within the requested wait; the query is still
    /// running.
    NotReady,
    /// The result stream ended normally; the session is idle again.
    NoMore,
}

/// One connection to the engine.
///
/// Sessions are single-owner: all operations take `&mut self`, which makes
/// concurrent requests on one session unrepresentable. Independent
/// sessions run in parallel.
#[derive(Debug)]
pub struct Session {
    transport: Transport,
    engine: Arc<EngineShared>,
    state: SessionState,
    /// Mode of the async query in flight (set by `run_async`).
    find_all: bool,
    comm_thread_id: Option<String>,
    goal_thread_id: Option<String>,
    protocol_version: Option<(i64, i64)>,
    default_timeout: Option<f64>,
}

/// A decoded engine reply, before operation-specific interpretation.
enum EngineReply {
    /// `true(<answers>)`; carries the answers JSON.
    True(Value),
    /// `false`.
    False,
    /// `exception(<term>)`.
    Exception(Term),
}

impl Session {
    /// Connect to the engine described by `shared` and perform the
    /// password handshake.
    pub(crate) async fn connect(engine: Arc<EngineShared>) -> Result<Session, MqiError> {
        let transport = Transport::connect(&engine.endpoint)
            .await
            .map_err(MqiError::from)?;
        let default_timeout = engine.query_timeout;

        let mut session = Session {
            transport,
            engine,
            state: SessionState::Handshaking,
            find_all: false,
            comm_thread_id: None,
            goal_thread_id: None,
            protocol_version: None,
            default_timeout,
        };
        session.handshake().await?;
        Ok(session)
    }

    /// Current state, for diagnostics and tests.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identifier of the engine-side communication thread, if reported.
    pub fn communication_thread_id(&self) -> Option<&str> {
        self.comm_thread_id.as_deref()
    }

    /// Identifier of the engine-side goal thread, if reported.
    pub fn goal_thread_id(&self) -> Option<&str> {
        self.goal_thread_id.as_deref()
    }

    /// Protocol version reported by the engine, if any.
    pub fn protocol_version(&self) -> Option<(i64, i64)> {
        self.protocol_version
    }

    /// Run `goal` synchronously and wait for all solutions.
    ///
    /// `timeout_seconds`: `None` uses the engine's default, a negative
    /// value disables the limit. The tokens are passed through to the
    /// engine unchanged. Heartbeats emitted while the query runs are
    /// absorbed by the framing layer.
    ///
    /// An engine-side `time_limit_exceeded` maps to
    /// [`MqiError::TimeoutExceeded`] and leaves the session idle.
    pub async fn run(
        &mut self,
        goal: &str,
        timeout_seconds: Option<f64>,
    ) -> Result<QueryResult, MqiError> {
        self.ensure_idle("run")?;

        let command = format!(
            "run(({}), {})",
            normalize_goal(goal),
            timeout_token(timeout_seconds)
        );
        let deadline = self.read_deadline(timeout_seconds);

        self.state = SessionState::SyncPending;
        self.send(&command).await?;
        let reply = self.read_reply(deadline).await?;

        match self.parse(reply)? {
            EngineReply::True(answers) => {
                let solutions = decode_solutions(&answers).map_err(|e| self.fail(e))?;
                self.state = SessionState::Idle;
                Ok(QueryResult::Solutions(solutions))
            }
            EngineReply::False => {
                self.state = SessionState::Idle;
                Ok(QueryResult::False)
            }
            EngineReply::Exception(term) => Err(self.exception(term)),
        }
    }

    /// Start `goal` asynchronously. Does not wait for the query to finish,
    /// only for the engine's acknowledgment.
    ///
    /// With `find_all` the engine collects every solution and delivers
    /// them in a single [`PollOutcome::Solutions`] batch; otherwise each
    /// [`Session::poll`] yields one solution.
    pub async fn run_async(
        &mut self,
        goal: &str,
        timeout_seconds: Option<f64>,
        find_all: bool,
    ) -> Result<(), MqiError> {
        self.ensure_idle("run_async")?;

        let command = format!(
            "run_async(({}), {}, {})",
            normalize_goal(goal),
            timeout_token(timeout_seconds),
            find_all
        );
        self.send(&command).await?;
        let reply = self.read_reply(Some(ACK_TIMEOUT)).await?;

        match self.parse(reply)? {
            EngineReply::True(_) => {
                self.state = SessionState::AsyncRunning;
                self.find_all = find_all;
                Ok(())
            }
            EngineReply::False => Err(self.fail(MqiError::ProtocolViolation(
                "engine answered false to run_async".to_string(),
            ))),
            // A goal that does not parse is rejected up front; the session
            // stays idle.
            EngineReply::Exception(term) => Err(self.exception(term)),
        }
    }

    /// Fetch the next result of the async query.
    ///
    /// `wait_seconds`: how long the engine should wait for a result before
    /// answering `result_not_available`; `None` or a negative value blocks
    /// until a result exists. Solutions are delivered in the exact order
    /// the engine produced them.
    ///
    /// Terminal exceptions (`cancel_goal`, `time_limit_exceeded`, or an
    /// uncaught goal exception) surface as errors and return the session
    /// to `Idle`; the normal end of the stream is [`PollOutcome::NoMore`].
    pub async fn poll(&mut self, wait_seconds: Option<f64>) -> Result<PollOutcome, MqiError> {
        self.ensure_open()?;

        let wait = wait_seconds.unwrap_or(-1.0);
        let command = format!("async_result({})", wait);
        let deadline = if wait >= 0.0 {
            Some(Duration::from_secs_f64(wait) + READ_SLACK)
        } else {
            None
        };

        self.send(&command).await?;
        let reply = self.read_reply(deadline).await?;

        match self.parse(reply)? {
            EngineReply::True(answers) => {
                let solutions = decode_solutions(&answers).map_err(|e| self.fail(e))?;
                self.state = if self.find_all {
                    SessionState::AsyncDraining
                } else {
                    SessionState::AsyncRunning
                };
                Ok(PollOutcome::Solutions(solutions))
            }
            EngineReply::False => {
                self.state = SessionState::AsyncDraining;
                Ok(PollOutcome::False)
            }
            EngineReply::Exception(term) => match term.as_atom() {
                Some("result_not_available") => Ok(PollOutcome::NotReady),
                Some("no_more_results") => {
                    self.state = SessionState::Idle;
                    Ok(PollOutcome::NoMore)
                }
                _ => Err(self.exception(term)),
            },
        }
    }

    /// Ask the engine to cancel the running async query.
    ///
    /// Cancellation is cooperative: the engine injects an exception into
    /// the goal, and the outcome is observed only through subsequent
    /// [`Session::poll`] calls (typically [`MqiError::Cancelled`]). The
    /// session state does not change here.
    pub async fn cancel(&mut self) -> Result<(), MqiError> {
        self.ensure_open()?;

        self.send("cancel_async").await?;
        let reply = self.read_reply(Some(ACK_TIMEOUT)).await?;

        match self.parse(reply)? {
            EngineReply::True(_) => Ok(()),
            EngineReply::False => Err(self.fail(MqiError::ProtocolViolation(
                "engine answered false to cancel_async".to_string(),
            ))),
            // Cancellation never changes session state by itself; if the
            // query already terminated engine-side, `no_query` comes back
            // here and the terminal outcome is still drained via poll.
            // Only an engine-reported connection failure breaks the
            // session.
            EngineReply::Exception(term) => {
                if term.as_atom() == Some("connection_failed") {
                    self.engine.mark_connection_failed();
                    return Err(self.fail(map_exception(term)));
                }
                Err(map_exception(term))
            }
        }
    }

    /// End the session cleanly. The engine aborts any query still running
    /// on this session; the engine process itself stays up.
    ///
    /// Idempotent, and silent on an already-broken transport: dropping a
    /// session releases the socket either way, `close` exists for the
    /// graceful, acknowledged path.
    pub async fn close(&mut self) -> Result<(), MqiError> {
        match self.state {
            SessionState::Closed => return Ok(()),
            SessionState::Broken => {
                self.state = SessionState::Closed;
                return Ok(());
            }
            _ => {}
        }

        debug!("closing session");
        match write_frame(&mut self.transport.writer, "close").await {
            Ok(()) => match timeout(ACK_TIMEOUT, read_frame(&mut self.transport.reader)).await {
                Ok(Ok(payload)) => trace!("close acknowledged: {}", payload.trim()),
                Ok(Err(e)) => warn!("error reading close acknowledgment: {}", e),
                Err(_) => warn!("timed out waiting for close acknowledgment"),
            },
            Err(e) => warn!("error sending close (transport already down?): {}", e),
        }

        self.transport.shutdown().await;
        self.state = SessionState::Closed;
        Ok(())
    }

    /// Ask the engine process to exit. Used by the engine handle's
    /// graceful shutdown path on a throw-away control session.
    pub(crate) async fn quit(&mut self) -> Result<(), MqiError> {
        self.ensure_open()?;

        self.send("quit").await?;
        let reply = self.read_reply(Some(QUIT_TIMEOUT)).await?;

        match self.parse(reply)? {
            EngineReply::True(_) => {
                // The engine is going down; no further connections will
                // succeed.
                self.engine.mark_connection_failed();
                self.state = SessionState::Closed;
                Ok(())
            }
            EngineReply::False => Err(self.fail(MqiError::ProtocolViolation(
                "engine answered false to quit".to_string(),
            ))),
            EngineReply::Exception(term) => Err(self.exception(term)),
        }
    }

    // ---- handshake ----

    async fn handshake(&mut self) -> Result<(), MqiError> {
        // Written directly rather than through send() so the secret never
        // reaches the trace log.
        let password = self.engine.password.clone();
        write_frame(&mut self.transport.writer, &password)
            .await
            .map_err(|e| self.fail(e))?;

        let reply = self.read_reply(Some(ACK_TIMEOUT)).await?;
        let answers = match parse_reply(&reply) {
            Ok(EngineReply::True(answers)) => answers,
            // Any first reply other than true(...) means the secret was
            // rejected.
            Ok(_) | Err(MqiError::ProtocolViolation(_)) => {
                self.state = SessionState::Broken;
                return Err(MqiError::AuthenticationFailed);
            }
            Err(e) => return Err(self.fail(e)),
        };

        self.parse_handshake_answers(&answers);
        self.state = SessionState::Idle;
        match (&self.comm_thread_id, &self.goal_thread_id) {
            (Some(comm), Some(goal)) => {
                info!("session established (threads {} / {})", comm, goal)
            }
            _ => info!("session established"),
        }
        Ok(())
    }

    /// Pull the informational `threads/2` and `version/2` terms out of the
    /// handshake reply. Older engines send `true([[]])`; tolerate any
    /// shape.
    fn parse_handshake_answers(&mut self, answers: &Value) {
        let first = match answers.as_array().and_then(|a| a.first()) {
            Some(v) => v,
            None => return,
        };
        let items = match Term::from_json(first) {
            Ok(Term::List(items)) => items,
            _ => return,
        };
        for item in &items {
            if let Some(args) = item.as_compound("threads", 2) {
                self.comm_thread_id = args[0].as_atom().map(String::from);
                self.goal_thread_id = args[1].as_atom().map(String::from);
            } else if let Some(args) = item.as_compound("version", 2) {
                if let (Some(major), Some(minor)) = (args[0].as_integer(), args[1].as_integer()) {
                    self.protocol_version = Some((major, minor));
                    debug!("engine protocol version {}.{}", major, minor);
                }
            }
        }
    }

    // ---- plumbing ----

    /// Send one command frame; a failed write breaks the session.
    async fn send(&mut self, command: &str) -> Result<(), MqiError> {
        trace!("-> {}", command);
        write_frame(&mut self.transport.writer, command)
            .await
            .map_err(|e| self.fail(e))
    }

    /// Read one reply frame (optionally bounded by `deadline`) and parse
    /// it as JSON. Timeouts, I/O errors, and unparseable payloads all
    /// break the session.
    async fn read_reply(&mut self, deadline: Option<Duration>) -> Result<Value, MqiError> {
        let read = read_frame(&mut self.transport.reader);
        let payload = match deadline {
            Some(limit) => match timeout(limit, read).await {
                Ok(result) => result,
                Err(_) => Err(MqiError::Transport(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "timed out waiting for engine reply",
                ))),
            },
            None => read.await,
        };

        match payload {
            Ok(text) => {
                trace!("<- {}", text.trim_end());
                serde_json::from_str(text.trim()).map_err(|e| {
                    self.fail(MqiError::ProtocolViolation(format!(
                        "reply is not valid JSON: {}",
                        e
                    )))
                })
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Parse a reply value, breaking the session on protocol garbage.
    fn parse(&mut self, reply: Value) -> Result<EngineReply, MqiError> {
        parse_reply(&reply).map_err(|e| self.fail(e))
    }

    /// Map an `exception(...)` payload to an error and apply the state
    /// transition for the state-changing operations (run, run_async,
    /// poll): recoverable exceptions return the session to `Idle`,
    /// everything else breaks it. `cancel` deliberately bypasses this.
    fn exception(&mut self, term: Term) -> MqiError {
        if term.as_atom() == Some("connection_failed") {
            self.engine.mark_connection_failed();
        }
        let err = map_exception(term);
        self.state = if err.is_recoverable() {
            SessionState::Idle
        } else {
            SessionState::Broken
        };
        err
    }

    /// Record a fatal error: anything non-recoverable breaks the session.
    fn fail(&mut self, err: MqiError) -> MqiError {
        if !err.is_recoverable() {
            self.state = SessionState::Broken;
        }
        err
    }

    fn ensure_open(&self) -> Result<(), MqiError> {
        match self.state {
            SessionState::Closed | SessionState::Broken => Err(MqiError::SessionUnavailable),
            _ => Ok(()),
        }
    }

    fn ensure_idle(&self, op: &str) -> Result<(), MqiError> {
        self.ensure_open()?;
        if self.state != SessionState::Idle {
            return Err(MqiError::InvalidState(format!(
                "{} requires an idle session (state: {:?})",
                op, self.state
            )));
        }
        Ok(())
    }

    /// Client-side read deadline for a synchronous query: the query's own
    /// timeout plus heartbeat slack. Unlimited or engine-default timeouts
    /// read without a deadline.
    fn read_deadline(&self, timeout_seconds: Option<f64>) -> Option<Duration> {
        let effective = timeout_seconds.or(self.default_timeout)?;
        if effective < 0.0 {
            None
        } else {
            Some(Duration::from_secs_f64(effective) + READ_SLACK)
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !matches!(self.state, SessionState::Closed | SessionState::Broken) {
            // Dropping the transport closes the socket; the engine treats
            // the disconnect as the end of the session and aborts any
            // running query.
            debug!("session dropped without close; releasing socket");
        }
    }
}

/// Strip surrounding whitespace and a single trailing period so the goal
/// can be embedded in the parenthesized `run((<goal>), <timeout>)` form.
fn normalize_goal(goal: &str) -> &str {
    let goal = goal.trim();
    goal.strip_suffix('.').map(str::trim_end).unwrap_or(goal)
}

/// Wire token for a query timeout: `_` asks for the engine default,
/// numbers (including negative "unlimited" values) pass through unchanged.
fn timeout_token(timeout_seconds: Option<f64>) -> String {
    match timeout_seconds {
        None => "_".to_string(),
        Some(t) => t.to_string(),
    }
}

/// Split a reply into the three shapes the engine may send.
fn parse_reply(reply: &Value) -> Result<EngineReply, MqiError> {
    if reply.as_str() == Some("false") {
        return Ok(EngineReply::False);
    }

    let functor = reply
        .get("functor")
        .and_then(Value::as_str)
        .ok_or_else(|| MqiError::ProtocolViolation(format!("reply has no functor: {}", reply)))?;
    let args = reply.get("args").and_then(Value::as_array);

    match functor {
        "true" => match args {
            Some(args) if args.len() == 1 => Ok(EngineReply::True(args[0].clone())),
            _ => Err(MqiError::ProtocolViolation(
                "true reply without a single answer list".to_string(),
            )),
        },
        "false" => Ok(EngineReply::False),
        "exception" => match args {
            Some(args) if args.len() == 1 => Ok(EngineReply::Exception(Term::from_json(&args[0])?)),
            _ => Err(MqiError::ProtocolViolation(
                "exception reply without a single term".to_string(),
            )),
        },
        other => Err(MqiError::ProtocolViolation(format!(
            "unknown reply functor '{}'",
            other
        ))),
    }
}

/// Convert the answers of a `true(...)` reply into solutions, reshaping
/// each `=`/2 binding into a named entry.
fn decode_solutions(answers: &Value) -> Result<Vec<Solution>, MqiError> {
    let answers = answers.as_array().ok_or_else(|| {
        MqiError::ProtocolViolation("true reply answers are not a list".to_string())
    })?;

    let mut solutions = Vec::with_capacity(answers.len());
    for answer in answers {
        let bindings = answer.as_array().ok_or_else(|| {
            MqiError::ProtocolViolation("answer is not a list of bindings".to_string())
        })?;

        let mut solution = Solution::new();
        for binding in bindings {
            let term = Term::from_json(binding)?;
            let (name, value) = term.as_binding().ok_or_else(|| {
                MqiError::ProtocolViolation(format!("answer element is not a binding: {}", term))
            })?;
            solution.insert(name.to_string(), value.clone());
        }
        solutions.push(solution);
    }
    Ok(solutions)
}

/// Map an engine exception term to the corresponding error kind.
fn map_exception(term: Term) -> MqiError {
    match term.as_atom() {
        Some("time_limit_exceeded") => MqiError::TimeoutExceeded,
        Some("no_more_results") => MqiError::NoMoreResults,
        Some("cancel_goal") => MqiError::Cancelled,
        Some("no_query") => MqiError::NoQuery,
        Some("connection_failed") => MqiError::Transport(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "engine reported connection_failed",
        )),
        _ => MqiError::QueryException { payload: term },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_goal() {
        assert_eq!(normalize_goal("member(X, [1,2])"), "member(X, [1,2])");
        assert_eq!(normalize_goal("  foo.  "), "foo");
        assert_eq!(normalize_goal("foo ."), "foo");
        assert_eq!(normalize_goal("atom('a.b')"), "atom('a.b')");
    }

    #[test]
    fn test_timeout_token_pass_through() {
        assert_eq!(timeout_token(None), "_");
        assert_eq!(timeout_token(Some(-1.0)), "-1");
        assert_eq!(timeout_token(Some(1.0)), "1");
        assert_eq!(timeout_token(Some(0.5)), "0.5");
    }

    #[test]
    fn test_parse_reply_shapes() {
        assert!(matches!(
            parse_reply(&json!({"functor": "true", "args": [[]]})),
            Ok(EngineReply::True(_))
        ));
        assert!(matches!(
            parse_reply(&json!({"functor": "false", "args": []})),
            Ok(EngineReply::False)
        ));
        assert!(matches!(
            parse_reply(&json!("false")),
            Ok(EngineReply::False)
        ));
        assert!(matches!(
            parse_reply(&json!({"functor": "exception", "args": ["no_query"]})),
            Ok(EngineReply::Exception(_))
        ));
        assert!(parse_reply(&json!({"functor": "mystery", "args": []})).is_err());
        assert!(parse_reply(&json!(42)).is_err());
        assert!(parse_reply(&json!({"functor": "true", "args": [[], []]})).is_err());
    }

    #[test]
    fn test_decode_solutions_member_shape() {
        // run(member(X,[1,2,3]), -1) -> true([[X=1],[X=2],[X=3]])
        let answers = json!([
            [{"functor": "=", "args": [{"functor": "variable", "args": ["X"]}, 1]}],
            [{"functor": "=", "args": [{"functor": "variable", "args": ["X"]}, 2]}],
            [{"functor": "=", "args": [{"functor": "variable", "args": ["X"]}, 3]}]
        ]);
        let solutions = decode_solutions(&answers).unwrap();
        assert_eq!(solutions.len(), 3);
        for (i, solution) in solutions.iter().enumerate() {
            assert_eq!(solution.get("X"), Some(&Term::Integer(i as i64 + 1)));
        }
    }

    #[test]
    fn test_decode_solutions_atom_lhs_binding() {
        let answers = json!([[{"functor": "=", "args": ["X", "a"]}]]);
        let solutions = decode_solutions(&answers).unwrap();
        assert_eq!(solutions[0].get("X"), Some(&Term::Atom("a".into())));
    }

    #[test]
    fn test_decode_solutions_empty_answer_is_empty_solution() {
        // true([[]]) -> one solution with no bindings (plain success).
        let answers = json!([[]]);
        let solutions = decode_solutions(&answers).unwrap();
        assert_eq!(solutions.len(), 1);
        assert!(solutions[0].is_empty());
    }

    #[test]
    fn test_decode_solutions_rejects_non_binding() {
        let answers = json!([[{"functor": "threads", "args": ["a", "b"]}]]);
        assert!(matches!(
            decode_solutions(&answers),
            Err(MqiError::ProtocolViolation(_))
        ));

        let answers = json!([[{"functor": "=", "args": [1, 2]}]]);
        assert!(matches!(
            decode_solutions(&answers),
            Err(MqiError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_map_exception_kinds() {
        assert!(matches!(
            map_exception(Term::Atom("time_limit_exceeded".into())),
            MqiError::TimeoutExceeded
        ));
        assert!(matches!(
            map_exception(Term::Atom("no_more_results".into())),
            MqiError::NoMoreResults
        ));
        assert!(matches!(
            map_exception(Term::Atom("cancel_goal".into())),
            MqiError::Cancelled
        ));
        assert!(matches!(
            map_exception(Term::Atom("no_query".into())),
            MqiError::NoQuery
        ));
        assert!(matches!(
            map_exception(Term::Atom("connection_failed".into())),
            MqiError::Transport(_)
        ));
        // Arbitrary exceptions keep their payload.
        let err = map_exception(Term::Compound {
            functor: "type_error".into(),
            args: vec![Term::Atom("integer".into()), Term::Atom("a".into())],
        });
        match err {
            MqiError::QueryException { payload } => {
                assert!(payload.as_compound("type_error", 2).is_some());
            }
            other => panic!("expected QueryException, got {:?}", other),
        }
    }
}
