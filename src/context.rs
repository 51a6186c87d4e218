//! Collaborators shared by every operation.

use std::path::PathBuf;
use std::time::Duration;

use crate::backlog::BacklogClient;
use crate::cancel::{CancelToken, Deadline};
use crate::capture;
use crate::config::ProjectConfig;
use crate::detector::{DetectInput, Detection, StateDetector};
use crate::error::Result;
use crate::log::{EventLog, LogEvent};
use crate::session::ClassifiedPane;
use crate::tmux::{Multiplexer, PaneRef};

pub struct Context<'a> {
    pub mux: &'a dyn Multiplexer,
    pub backlog: &'a dyn BacklogClient,
    pub config: &'a ProjectConfig,
    pub cancel: &'a CancelToken,
    pub events: Option<&'a EventLog>,
    /// Project `.ntm/` directory (handoffs, logs).
    pub state_root: PathBuf,
}

impl Context<'_> {
    pub fn detector(&self) -> StateDetector {
        StateDetector::new(self.config.health.tail_lines)
    }

    pub fn record(&self, event: LogEvent) {
        if let Some(log) = self.events {
            log.record(event);
        }
    }

    /// Capture and clean the last `lines` lines of a pane.
    pub fn capture_lines(&self, pane: &PaneRef, lines: usize) -> Result<Vec<String>> {
        let raw = self.mux.capture(pane, lines)?;
        Ok(capture::clean_lines(&raw))
    }

    /// Capture a pane and classify it.
    pub fn detect(&self, pane: &ClassifiedPane) -> Result<(Vec<String>, Detection)> {
        let lines = self.capture_lines(pane.pane(), self.config.health.capture_lines)?;
        let detection = self.detector().detect(&DetectInput {
            lines: &lines,
            agent: pane.agent,
            dead: pane.info.dead,
        });
        Ok((lines, detection))
    }

    /// Capture `pane` every `poll` until `done` holds or `timeout` elapses.
    ///
    /// Always checks at least once, so a zero timeout is a single look.
    pub fn poll_until(
        &self,
        pane: &PaneRef,
        timeout: Duration,
        poll: Duration,
        mut done: impl FnMut(&[String]) -> bool,
    ) -> Result<bool> {
        let deadline = Deadline::after(timeout);
        loop {
            let lines = self.capture_lines(pane, self.config.health.capture_lines)?;
            if done(&lines) {
                return Ok(true);
            }
            if deadline.passed() {
                return Ok(false);
            }
            self.cancel.sleep(poll)?;
        }
    }
}
