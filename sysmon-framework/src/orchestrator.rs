//! Cycles the monitored operation through a fixed sequence, advancing only
//! when the event log shows the current operation happened.

use std::time::Duration;

use log::{debug, info};
use sysmon_common::{FsmConfig, OperationKind};
use tokio_util::sync::CancellationToken;

use crate::event_sink::DEFAULT_WINDOW;
use crate::{ControlChannel, ControlRequest, Epoch, EventQuery, EventSource};
use crate::{FsmError, OrchestratorError};

/// Non-empty cycle of operations and the position in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fsm {
    states: Vec<OperationKind>,
    current: usize,
}

impl Fsm {
    pub fn new(states: Vec<OperationKind>) -> Result<Self, FsmError> {
        if states.is_empty() {
            return Err(FsmError::Empty);
        }
        Ok(Self { states, current: 0 })
    }

    pub fn from_config(config: &FsmConfig) -> Result<Self, FsmError> {
        Self::new(config.states.clone())
    }

    pub fn current(&self) -> OperationKind {
        self.states[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Move to the next state, wrapping after the last. Returns the new index.
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.states.len();
        self.current
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[OperationKind] {
        &self.states
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    /// Pause after a transition before targeting the next operation.
    pub settle_interval: Duration,
    /// How many of the most recent events each poll looks at.
    pub window: usize,
    /// Give up after this many polls per state. `None` waits forever.
    pub max_polls: Option<u32>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            settle_interval: Duration::from_secs(1),
            window: DEFAULT_WINDOW,
            max_polls: None,
        }
    }
}

/// One completed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub operation: OperationKind,
    pub polls: u32,
    pub next_index: usize,
}

pub struct Orchestrator<C, E> {
    channel: C,
    events: E,
    fsm: Fsm,
    config: OrchestratorConfig,
}

impl<C: ControlChannel, E: EventSource> Orchestrator<C, E> {
    pub fn new(channel: C, events: E, fsm: Fsm, config: OrchestratorConfig) -> Self {
        Self {
            channel,
            events,
            fsm,
            config,
        }
    }

    pub fn fsm(&self) -> &Fsm {
        &self.fsm
    }

    /// Run until `cancel` fires or a step fails. Cancellation leaves the
    /// policy exactly as last set.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), OrchestratorError> {
        info!("[FSM] Starting FSM execution");
        while !cancel.is_cancelled() {
            if self.step(cancel).await?.is_none() {
                break;
            }
            if !cancel.is_cancelled() {
                tokio::time::sleep(self.config.settle_interval).await;
            }
        }
        info!("[FSM] Stopped in state {}", self.fsm.current_index() + 1);
        Ok(())
    }

    /// Target the current state's operation and wait for it to be observed.
    /// `Ok(None)` means the wait was cancelled.
    pub async fn step(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Detection>, OrchestratorError> {
        let operation = self.fsm.current();
        info!(
            "[FSM] Current State: {}/{} - Monitoring: {}",
            self.fsm.current_index() + 1,
            self.fsm.len(),
            operation
        );
        self.channel
            .apply(ControlRequest::SetTargetOperation(operation))
            .await?;
        // Only events appended after the target took effect count.
        let since = self.events.epoch().await?;

        info!("[FSM] Waiting for {}() syscall...", operation);
        let Some(polls) = self.wait_for(operation, since, cancel).await? else {
            return Ok(None);
        };
        let next_index = self.fsm.advance();
        info!(
            "[FSM] Observed {}()! Transitioning to next state...",
            operation
        );
        Ok(Some(Detection {
            operation,
            polls,
            next_index,
        }))
    }

    /// Poll until `operation` shows up after `since`. Each poll sleeps one
    /// interval and then checks; cancellation is seen between polls only.
    /// With `max_polls` set, no more than that many polls are made.
    pub async fn wait_for(
        &self,
        operation: OperationKind,
        since: Epoch,
        cancel: &CancellationToken,
    ) -> Result<Option<u32>, OrchestratorError> {
        let query = EventQuery::observed(operation, since, self.config.window);
        let mut polls = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(max) = self.config.max_polls {
                if polls >= max {
                    return Err(OrchestratorError::DetectionTimeout { operation, polls });
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
            polls += 1;
            if self.events.find(&query).await? {
                debug!("{}() observed after {} polls", operation, polls);
                return Ok(Some(polls));
            }
        }
    }
}
