//! Restart supervision for the inbound update loop.
//!
//! ```text
//! Starting ──connected──▶ Running ──error──▶ Failed ──attempts < max──▶ Backoff ──delay──▶ Starting
//!    │                                          └──attempts ≥ max──▶ Exhausted
//!    └────────── any state, on shutdown ──────────▶ Stopped
//! ```
//!
//! A connect failure counts like a loop failure. The attempt counter only
//! ever grows; a successful reconnect does not reset it.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::error::ReceiveError;
use crate::notifier::BotIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    Failed,
    Backoff,
    Exhausted,
    Stopped,
}

/// Linear backoff: `base × attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RestartPolicy {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            backoff_base: Duration::from_secs(config.backoff_base_secs),
            backoff_max: Duration::from_secs(config.backoff_max_secs),
        }
    }

    /// Delay before restarting after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(attempt)
            .min(self.backoff_max)
    }

    fn after_failure(&self, attempts: u32) -> SupervisorState {
        if attempts < self.max_restarts {
            SupervisorState::Backoff
        } else {
            SupervisorState::Exhausted
        }
    }
}

/// The inbound update loop the supervisor keeps alive.
#[async_trait]
pub trait ReceiveLoop: Send {
    /// Confirm the platform connection and return the bot's identity.
    async fn connect(&mut self) -> Result<BotIdentity, ReceiveError>;

    /// Process updates until `shutdown` is cancelled (`Ok`) or the loop breaks (`Err`).
    async fn run(&mut self, shutdown: CancellationToken) -> Result<(), ReceiveError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    Stopped,
    Exhausted { attempts: u32 },
}

impl SupervisorExit {
    pub fn exit_code(&self) -> u8 {
        match self {
            SupervisorExit::Stopped => 0,
            SupervisorExit::Exhausted { .. } => 2,
        }
    }
}

pub struct RestartSupervisor {
    policy: RestartPolicy,
    state: SupervisorState,
    attempts: u32,
    history: Vec<SupervisorState>,
}

impl RestartSupervisor {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            state: SupervisorState::Starting,
            attempts: 0,
            history: vec![SupervisorState::Starting],
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Every state entered so far, starting with `Starting`.
    pub fn history(&self) -> &[SupervisorState] {
        &self.history
    }

    /// Drive `receiver` until shutdown or until the restart budget is spent.
    /// `on_connected` runs after every successful connect.
    pub async fn run<L, F>(
        &mut self,
        receiver: &mut L,
        shutdown: &CancellationToken,
        mut on_connected: F,
    ) -> SupervisorExit
    where
        L: ReceiveLoop,
        F: FnMut(&BotIdentity) + Send,
    {
        loop {
            match self.state {
                SupervisorState::Starting => {
                    let connected = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => None,
                        result = receiver.connect() => Some(result),
                    };
                    match connected {
                        None => self.enter(SupervisorState::Stopped),
                        Some(Ok(identity)) => {
                            info!("Connected as @{} ({})", identity.username, identity.id);
                            self.enter(SupervisorState::Running);
                            on_connected(&identity);
                        }
                        Some(Err(e)) => {
                            error!(attempt = self.attempts + 1, error = %e, "Receive loop failed to start");
                            self.enter(SupervisorState::Failed);
                        }
                    }
                }
                SupervisorState::Running => {
                    let result = receiver.run(shutdown.clone()).await;
                    if shutdown.is_cancelled() {
                        self.enter(SupervisorState::Stopped);
                        continue;
                    }
                    let e = match result {
                        Ok(()) => ReceiveError::LoopExited,
                        Err(e) => e,
                    };
                    error!(attempt = self.attempts + 1, error = %e, "Receive loop failed");
                    self.enter(SupervisorState::Failed);
                }
                SupervisorState::Failed => {
                    self.attempts += 1;
                    let next = self.policy.after_failure(self.attempts);
                    self.enter(next);
                }
                SupervisorState::Backoff => {
                    let delay = self.policy.delay(self.attempts);
                    warn!(
                        attempt = self.attempts,
                        max_restarts = self.policy.max_restarts,
                        "Restarting receive loop in {:?}",
                        delay
                    );
                    let stopped = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if stopped {
                        self.enter(SupervisorState::Stopped);
                    } else {
                        self.enter(SupervisorState::Starting);
                    }
                }
                SupervisorState::Exhausted => {
                    error!(
                        "Restart budget of {} reached, giving up",
                        self.policy.max_restarts
                    );
                    return SupervisorExit::Exhausted {
                        attempts: self.attempts,
                    };
                }
                SupervisorState::Stopped => {
                    info!("Receive loop stopped");
                    return SupervisorExit::Stopped;
                }
            }
        }
    }

    fn enter(&mut self, next: SupervisorState) {
        debug!(from = ?self.state, to = ?next, "Supervisor transition");
        self.state = next;
        self.history.push(next);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    enum Step {
        ConnectFails,
        RunFails,
        /// Connect, then block until shutdown.
        Serve,
        /// Cancel the token from inside connect, then fail.
        ConnectFailsAndCancel,
    }

    struct ScriptedLoop {
        steps: VecDeque<Step>,
        current: Option<Step>,
        connects: u32,
        cancel: CancellationToken,
    }

    impl ScriptedLoop {
        fn new(steps: Vec<Step>, cancel: CancellationToken) -> Self {
            Self {
                steps: steps.into(),
                current: None,
                connects: 0,
                cancel,
            }
        }
    }

    #[async_trait]
    impl ReceiveLoop for ScriptedLoop {
        async fn connect(&mut self) -> Result<BotIdentity, ReceiveError> {
            self.connects += 1;
            let step = self.steps.pop_front().unwrap_or(Step::RunFails);
            let result = match step {
                Step::ConnectFails => Err(ReceiveError::Connect("unreachable".to_string())),
                Step::ConnectFailsAndCancel => {
                    self.cancel.cancel();
                    Err(ReceiveError::Connect("unreachable".to_string()))
                }
                _ => Ok(BotIdentity {
                    id: 99,
                    username: "suggest_bot".to_string(),
                }),
            };
            self.current = Some(step);
            result
        }

        async fn run(&mut self, shutdown: CancellationToken) -> Result<(), ReceiveError> {
            match self.current.take() {
                Some(Step::Serve) => {
                    shutdown.cancelled().await;
                    Ok(())
                }
                _ => Err(ReceiveError::Platform("conflict".to_string())),
            }
        }
    }

    fn policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            max_restarts,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_linear_backoff_is_capped() {
        let policy = RestartPolicy {
            max_restarts: 10,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(12),
        };
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(2), Duration::from_secs(10));
        assert_eq!(policy.delay(3), Duration::from_secs(12));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(12));
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RestartPolicy::from_config(&SupervisorConfig::default());
        assert_eq!(policy.max_restarts, 5);
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(100), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_exhausts_after_max_failures() {
        let shutdown = CancellationToken::new();
        let mut receiver = ScriptedLoop::new(
            vec![Step::RunFails, Step::RunFails, Step::RunFails],
            shutdown.clone(),
        );
        let mut supervisor = RestartSupervisor::new(policy(3));

        let exit = supervisor.run(&mut receiver, &shutdown, |_| {}).await;

        assert_eq!(exit, SupervisorExit::Exhausted { attempts: 3 });
        assert_ne!(exit.exit_code(), 0);
        assert_eq!(receiver.connects, 3);
        assert_eq!(supervisor.state(), SupervisorState::Exhausted);

        let history = supervisor.history();
        let failures = history
            .iter()
            .filter(|s| **s == SupervisorState::Failed)
            .count();
        assert_eq!(failures, 3);
        let last_start = history
            .iter()
            .rposition(|s| *s == SupervisorState::Starting)
            .unwrap();
        let exhausted = history
            .iter()
            .position(|s| *s == SupervisorState::Exhausted)
            .unwrap();
        assert!(last_start < exhausted);
        assert_eq!(exhausted, history.len() - 1);
    }

    #[tokio::test]
    async fn test_connect_failures_count_towards_budget() {
        let shutdown = CancellationToken::new();
        let mut receiver =
            ScriptedLoop::new(vec![Step::ConnectFails, Step::ConnectFails], shutdown.clone());
        let mut supervisor = RestartSupervisor::new(policy(2));

        let exit = supervisor.run(&mut receiver, &shutdown, |_| {}).await;

        assert_eq!(exit, SupervisorExit::Exhausted { attempts: 2 });
        assert_eq!(receiver.connects, 2);
        assert!(!supervisor.history().contains(&SupervisorState::Running));
    }

    #[tokio::test]
    async fn test_zero_budget_exhausts_on_first_failure() {
        let shutdown = CancellationToken::new();
        let mut receiver = ScriptedLoop::new(vec![Step::RunFails], shutdown.clone());
        let mut supervisor = RestartSupervisor::new(policy(0));

        let exit = supervisor.run(&mut receiver, &shutdown, |_| {}).await;

        assert_eq!(exit, SupervisorExit::Exhausted { attempts: 1 });
        assert_eq!(receiver.connects, 1);
    }

    #[tokio::test]
    async fn test_restart_then_clean_shutdown() {
        let shutdown = CancellationToken::new();
        let mut receiver =
            ScriptedLoop::new(vec![Step::RunFails, Step::Serve], shutdown.clone());
        let mut supervisor = RestartSupervisor::new(policy(5));

        let canceller = shutdown.clone();
        let mut connected = 0;
        let exit = supervisor
            .run(&mut receiver, &shutdown, |identity| {
                assert_eq!(identity.username, "suggest_bot");
                connected += 1;
                if connected == 2 {
                    canceller.cancel();
                }
            })
            .await;

        assert_eq!(exit, SupervisorExit::Stopped);
        assert_eq!(exit.exit_code(), 0);
        assert_eq!(connected, 2);
        assert_eq!(supervisor.attempts(), 1);
        assert_eq!(
            supervisor.history(),
            &[
                SupervisorState::Starting,
                SupervisorState::Running,
                SupervisorState::Failed,
                SupervisorState::Backoff,
                SupervisorState::Starting,
                SupervisorState::Running,
                SupervisorState::Stopped,
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff_stops_without_restart() {
        let shutdown = CancellationToken::new();
        let mut receiver = ScriptedLoop::new(vec![Step::ConnectFailsAndCancel], shutdown.clone());
        let mut supervisor = RestartSupervisor::new(RestartPolicy {
            max_restarts: 5,
            backoff_base: Duration::from_secs(3600),
            backoff_max: Duration::from_secs(3600),
        });

        let exit = supervisor.run(&mut receiver, &shutdown, |_| {}).await;

        assert_eq!(exit, SupervisorExit::Stopped);
        assert_eq!(receiver.connects, 1);
        assert_eq!(
            supervisor.history().last(),
            Some(&SupervisorState::Stopped)
        );
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let mut receiver = ScriptedLoop::new(vec![Step::Serve], shutdown.clone());
        let mut supervisor = RestartSupervisor::new(policy(5));

        let exit = supervisor.run(&mut receiver, &shutdown, |_| {}).await;

        assert_eq!(exit, SupervisorExit::Stopped);
        assert_eq!(receiver.connects, 0);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }
}
