//! Response aggregation.
//!
//! Responses from mesh zones arrive in no particular order. The aggregator
//! counts finished zones, remembers the latest reported error and decides,
//! after every response, whether the command reached a terminal state.

use common::protocol::{CommandTag, Response};

/// Rule deciding when a command is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TerminationPolicy {
    /// The first finished response completes the command.
    SingleResponder,

    /// The given number of finished responses completes the command.
    Quorum(u32),

    /// Responses never complete the command, only cancellation ends it.
    Streaming,
}

impl TerminationPolicy {
    /// Policy of a command given the expected number of mesh zones.
    pub(crate) fn for_command(command: CommandTag, quorum: u32) -> Self {
        match command {
            CommandTag::Upload => TerminationPolicy::SingleResponder,
            CommandTag::Logs => TerminationPolicy::Streaming,
            CommandTag::Create | CommandTag::Remove | CommandTag::Status => {
                TerminationPolicy::Quorum(quorum)
            }
        }
    }
}

/// Command lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum State {
    /// Not dispatched yet.
    Pending,

    /// Dispatched, waiting for responses.
    Running,

    /// Completed without errors.
    Succeeded,

    /// Completed with the contained error.
    Failed(String),

    /// Deadline elapsed before completion.
    TimedOut,

    /// Cancelled by the user.
    Interrupted,
}

impl State {
    /// Terminal states are never left.
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self, State::Pending | State::Running)
    }
}

/// Per-command aggregation state.
#[derive(Debug)]
pub(crate) struct SessionState {
    /// Number of finished responses.
    completed: u32,

    /// Most recent non-empty error.
    last_error: Option<String>,

    /// Lifecycle state.
    state: State,
}

impl SessionState {
    /// Current lifecycle state.
    pub(crate) fn state(&self) -> &State {
        &self.state
    }

    /// Number of finished responses received.
    pub(crate) fn completed(&self) -> u32 {
        self.completed
    }

    /// Most recent error reported by any zone.
    pub(crate) fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// State machine consuming responses of a single command.
#[derive(Debug)]
pub(crate) struct Aggregator {
    /// Completion rule.
    policy: TerminationPolicy,

    /// Complete as failed as soon as an error is known.
    fail_fast: bool,

    /// Aggregated state.
    session: SessionState,
}

impl Aggregator {
    /// Create a pending aggregator.
    pub(crate) fn new(policy: TerminationPolicy, fail_fast: bool) -> Self {
        Self {
            policy,
            fail_fast,
            session: SessionState {
                completed: 0,
                last_error: None,
                state: State::Pending,
            },
        }
    }

    /// Mark the command as dispatched.
    pub(crate) fn start(&mut self) {
        if self.session.state == State::Pending {
            self.session.state = State::Running;
        }
    }

    /// Account for a response.
    ///
    /// Returns the terminal state if this response completed the command.
    /// Responses received outside of the running state are ignored.
    pub(crate) fn observe(&mut self, response: &Response) -> Option<&State> {
        if self.session.state != State::Running {
            return None;
        }

        if !response.error.is_empty() {
            self.session.last_error = Some(response.error.clone());
        }

        if response.done {
            self.session.completed += 1;
        }

        if self.session.completed == 0 {
            return None;
        }

        let complete = match self.policy {
            TerminationPolicy::SingleResponder => true,
            TerminationPolicy::Quorum(quorum) => self.session.completed >= quorum,
            TerminationPolicy::Streaming => false,
        };

        let short_circuit = self.fail_fast
            && self.session.last_error.is_some()
            && self.policy != TerminationPolicy::Streaming;

        if complete || short_circuit {
            self.session.state = match &self.session.last_error {
                Some(error) => State::Failed(error.clone()),
                None => State::Succeeded,
            };

            return Some(&self.session.state);
        }

        None
    }

    /// Deadline elapsed: fail with the recorded error, or time out.
    pub(crate) fn expire(&mut self) -> &State {
        if !self.session.state.is_terminal() {
            self.session.state = match &self.session.last_error {
                Some(error) => State::Failed(error.clone()),
                None => State::TimedOut,
            };
        }

        &self.session.state
    }

    /// Cancellation requested.
    pub(crate) fn interrupt(&mut self) -> &State {
        if !self.session.state.is_terminal() {
            self.session.state = State::Interrupted;
        }

        &self.session.state
    }

    /// Finish aggregation, yielding the final state.
    pub(crate) fn into_session(self) -> SessionState {
        self.session
    }
}
