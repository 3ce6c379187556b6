//! The display controller: decides the single active mode at any instant,
//! how long it stays up, and when a live event or an explicit override
//! interrupts the rotation.
//!
//! `tick` is deterministic given its `now` argument, so tests can drive a
//! simulated clock. The async `run` loop just calls `tick` at the frame
//! cadence and forwards frames to the pixel pipeline.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::duration::DurationParams;
use super::mode::{Frame, LiveSignalBoard, ModeCollaborator, RotationSchedule};
use crate::cache::CacheStore;
use crate::config::{Config, ModeCategory, ModeConfig};
use crate::fetch::{BackgroundFetchService, FetchResult, SubmitOutcome};
use crate::graceful::{DeferredUpdate, GracefulUpdateCoordinator};

/// How the current mode was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
  /// Normal rotation through the schedule.
  RotatingNormal,
  /// A live event preempted rotation.
  LivePreempted {
    mode_id: String,
    /// Schedule index to resume at when the event ends. Set at preemption
    /// time so a completed mode is never re-shown.
    resume_index: usize,
  },
  /// An explicit external request pinned one mode indefinitely.
  OnDemandOverride { mode_id: String },
}

/// External control commands (driven by the configuration interface).
#[derive(Debug)]
pub enum SchedulerCommand {
  /// Show the named mode indefinitely, pausing rotation.
  Override(String),
  /// End an override and resume rotation.
  ClearOverride,
  /// Replace the rotation schedule from new mode configuration.
  ReloadSchedule(Vec<ModeConfig>),
}

/// Cloneable handle for issuing scheduler commands from other tasks.
#[derive(Clone)]
pub struct SchedulerHandle {
  tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
  pub fn request_override(&self, mode_id: impl Into<String>) {
    let _ = self.tx.send(SchedulerCommand::Override(mode_id.into()));
  }

  pub fn clear_override(&self) {
    let _ = self.tx.send(SchedulerCommand::ClearOverride);
  }

  pub fn reload_schedule(&self, modes: Vec<ModeConfig>) {
    let _ = self.tx.send(SchedulerCommand::ReloadSchedule(modes));
  }
}

/// The top-level control loop state. One instance owns the whole rotation;
/// there is no global mutable state, so independent schedulers can coexist
/// in-process (and in tests).
pub struct RotationScheduler {
  schedule: RotationSchedule,
  collaborators: HashMap<String, Arc<dyn ModeCollaborator>>,
  cache: Arc<CacheStore>,
  fetch: BackgroundFetchService,
  graceful: Arc<GracefulUpdateCoordinator>,
  live: Arc<LiveSignalBoard>,
  durations: DurationParams,
  frame_delay: Duration,

  phase: Phase,
  current_index: usize,
  slot_started_at: Option<Instant>,
  slot_duration: Duration,
  /// Live modes that signaled while another was preempting, in schedule
  /// order; each shows after the current event ends.
  pending_live: VecDeque<String>,

  command_tx: mpsc::UnboundedSender<SchedulerCommand>,
  command_rx: mpsc::UnboundedReceiver<SchedulerCommand>,
}

impl RotationScheduler {
  pub fn new(
    config: &Config,
    collaborators: Vec<Arc<dyn ModeCollaborator>>,
    cache: Arc<CacheStore>,
    fetch: BackgroundFetchService,
    graceful: Arc<GracefulUpdateCoordinator>,
    live: Arc<LiveSignalBoard>,
  ) -> Self {
    let collaborators: HashMap<String, Arc<dyn ModeCollaborator>> = collaborators
      .into_iter()
      .map(|c| (c.mode_id().to_string(), c))
      .collect();

    let schedule =
      RotationSchedule::from_config(&config.modes, |id| collaborators.contains_key(id));

    let (command_tx, command_rx) = mpsc::unbounded_channel();

    Self {
      schedule,
      collaborators,
      cache,
      fetch,
      graceful,
      live,
      durations: DurationParams::from_config(&config.display),
      frame_delay: Duration::from_millis(config.display.frame_delay_ms),
      phase: Phase::RotatingNormal,
      current_index: 0,
      slot_started_at: None,
      slot_duration: Duration::ZERO,
      pending_live: VecDeque::new(),
      command_tx,
      command_rx,
    }
  }

  /// Handle for issuing commands from other tasks (web UI glue).
  pub fn handle(&self) -> SchedulerHandle {
    SchedulerHandle {
      tx: self.command_tx.clone(),
    }
  }

  /// The id of the mode currently on screen.
  pub fn current_mode(&self) -> &str {
    match &self.phase {
      Phase::RotatingNormal => &self.schedule.entry(self.current_index).id,
      Phase::LivePreempted { mode_id, .. } => mode_id,
      Phase::OnDemandOverride { mode_id } => mode_id,
    }
  }

  /// Remaining scheduled time for the current mode. Live and override
  /// modes have no scheduled end and report zero.
  pub fn remaining_duration(&self, now: Instant) -> Duration {
    match (&self.phase, self.slot_started_at) {
      (Phase::RotatingNormal, Some(started)) => self
        .slot_duration
        .saturating_sub(now.duration_since(started)),
      (Phase::RotatingNormal, None) => self.slot_duration,
      _ => Duration::ZERO,
    }
  }

  /// One scheduler step: process commands, live signals, rotation advance,
  /// render, and the deferred-update drain. Never blocks on I/O.
  ///
  /// Returns the frame to display, or `None` when no mode could produce
  /// renderable content this tick.
  pub fn tick(&mut self, now: Instant) -> Option<Frame> {
    self.drain_commands();
    self.apply_live_signals(now);
    self.advance_rotation(now);
    let frame = self.render_current(now);
    self.graceful.process_deferred();
    frame
  }

  /// Run the control loop at the configured frame cadence until ctrl-c.
  ///
  /// Frames go to `frame_tx` (the pixel pipeline); fetch completions are
  /// drained from `completions` for observability.
  pub async fn run(
    mut self,
    mut completions: mpsc::UnboundedReceiver<FetchResult>,
    frame_tx: mpsc::UnboundedSender<Frame>,
  ) -> color_eyre::Result<()> {
    let mut interval = tokio::time::interval(self.frame_delay);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
      modes = self.schedule.len(),
      frame_delay_ms = self.frame_delay.as_millis() as u64,
      "Display rotation started"
    );

    loop {
      tokio::select! {
        _ = interval.tick() => {
          if let Some(frame) = self.tick(Instant::now()) {
            if frame_tx.send(frame).is_err() {
              // Pixel pipeline went away; nothing left to drive
              warn!("Frame consumer dropped; stopping rotation");
              break;
            }
          }
        }
        Some(result) = completions.recv() => {
          debug!(
            key = %result.cache_key,
            success = result.success,
            attempts = result.attempts,
            "Fetch completion observed"
          );
        }
        _ = tokio::signal::ctrl_c() => {
          info!("Shutdown requested");
          break;
        }
      }
    }

    self.fetch.shutdown();
    Ok(())
  }

  fn drain_commands(&mut self) {
    while let Ok(command) = self.command_rx.try_recv() {
      match command {
        SchedulerCommand::Override(mode_id) => {
          if self.collaborators.contains_key(&mode_id) {
            info!(mode_id = %mode_id, "On-demand override active; rotation paused");
            self.phase = Phase::OnDemandOverride { mode_id };
          } else {
            warn!(mode_id = %mode_id, "Override requested for unknown mode; ignoring");
          }
        }
        SchedulerCommand::ClearOverride => {
          if matches!(self.phase, Phase::OnDemandOverride { .. }) {
            info!("Override cleared; resuming rotation");
            self.phase = Phase::RotatingNormal;
            self.slot_started_at = None; // current slot restarts fresh
          }
        }
        SchedulerCommand::ReloadSchedule(modes) => {
          let showing = self.current_mode().to_string();
          self.schedule =
            RotationSchedule::from_config(&modes, |id| self.collaborators.contains_key(id));
          // Keep the current mode on screen when it survived the reload
          self.current_index = self.schedule.position(&showing).unwrap_or(0);
          self.slot_started_at = None;
          self.pending_live.clear();
          info!(modes = self.schedule.len(), "Schedule reloaded");
        }
      }
    }
  }

  fn apply_live_signals(&mut self, now: Instant) {
    // Live-priority modes currently signaling, in schedule order
    let signaling: Vec<String> = self
      .schedule
      .entries()
      .iter()
      .filter(|d| {
        d.category == ModeCategory::Live && d.live_priority && self.live.is_live(&d.id)
      })
      .map(|d| d.id.clone())
      .collect();

    match self.phase.clone() {
      // An explicit operator request outranks live events
      Phase::OnDemandOverride { .. } => {}

      Phase::RotatingNormal => {
        if let Some(winner) = signaling.first() {
          info!(mode_id = %winner, "Live event preempting rotation");
          for other in signaling.iter().skip(1) {
            if !self.pending_live.contains(other) {
              self.pending_live.push_back(other.clone());
            }
          }
          self.phase = Phase::LivePreempted {
            mode_id: winner.clone(),
            resume_index: (self.current_index + 1) % self.schedule.len(),
          };
        }
      }

      Phase::LivePreempted {
        mode_id,
        resume_index,
      } => {
        // Queue any newly signaling modes behind the current one
        for other in &signaling {
          if *other != mode_id && !self.pending_live.contains(other) {
            self.pending_live.push_back(other.clone());
          }
        }

        if !self.live.is_live(&mode_id) {
          self.pending_live.retain(|id| self.live.is_live(id));
          if let Some(next) = self.pending_live.pop_front() {
            info!(mode_id = %next, "Queued live event taking over");
            self.phase = Phase::LivePreempted {
              mode_id: next,
              resume_index,
            };
          } else {
            self.phase = Phase::RotatingNormal;
            self.current_index = resume_index % self.schedule.len();
            self.slot_started_at = Some(now);
            self.slot_duration = self.duration_for_index(self.current_index);
            info!(
              mode_id = %self.schedule.entry(self.current_index).id,
              "Live event ended; rotation resumed"
            );
          }
        }
      }
    }
  }

  fn advance_rotation(&mut self, now: Instant) {
    if self.phase != Phase::RotatingNormal {
      return;
    }

    match self.slot_started_at {
      None => {
        self.slot_started_at = Some(now);
        self.slot_duration = self.duration_for_index(self.current_index);
      }
      Some(started) => {
        if now.duration_since(started) >= self.slot_duration {
          self.current_index = (self.current_index + 1) % self.schedule.len();
          self.slot_started_at = Some(now);
          self.slot_duration = self.duration_for_index(self.current_index);
          debug!(
            mode_id = %self.schedule.entry(self.current_index).id,
            duration_s = self.slot_duration.as_secs(),
            "Rotation advanced"
          );
        }
      }
    }
  }

  fn duration_for_index(&self, index: usize) -> Duration {
    let descriptor = self.schedule.entry(index);
    let width = self
      .collaborators
      .get(&descriptor.id)
      .map(|c| c.content_width(&self.cache))
      .unwrap_or(0);
    self.durations.resolve(descriptor.fixed_duration, width)
  }

  fn render_current(&mut self, now: Instant) -> Option<Frame> {
    match self.phase.clone() {
      Phase::RotatingNormal => {
        // A mode that can't render is skipped for this rotation slot; it
        // gets another chance on its next scheduled turn.
        for _ in 0..self.schedule.len() {
          let mode_id = self.schedule.entry(self.current_index).id.clone();
          if let Some(frame) = self.try_render(&mode_id) {
            return Some(frame);
          }

          warn!(mode_id = %mode_id, "Skipping mode for this rotation slot");
          self.current_index = (self.current_index + 1) % self.schedule.len();
          self.slot_started_at = Some(now);
          self.slot_duration = self.duration_for_index(self.current_index);
        }
        None
      }
      Phase::LivePreempted { mode_id, .. } | Phase::OnDemandOverride { mode_id } => {
        self.try_render(&mode_id)
      }
    }
  }

  fn try_render(&self, mode_id: &str) -> Option<Frame> {
    let collaborator = match self.collaborators.get(mode_id) {
      Some(c) => Arc::clone(c),
      None => {
        error!(mode_id = %mode_id, "No collaborator registered for mode");
        return None;
      }
    };

    if !collaborator.is_enabled() {
      debug!(mode_id = %mode_id, "Mode reports itself disabled");
      return None;
    }

    self.refresh_if_stale(&collaborator);

    match collaborator.render_current(&self.cache) {
      Ok(frame) => Some(frame),
      Err(e) => {
        warn!(mode_id = %mode_id, error = %e, "Mode render failed");
        None
      }
    }
  }

  /// Kick off a background refresh when the mode's data is stale. If the
  /// mode's region is mid-scroll, the submission itself is deferred so the
  /// cache write can't land during the pass.
  fn refresh_if_stale(&self, collaborator: &Arc<dyn ModeCollaborator>) {
    let Some(key) = collaborator.cache_key() else {
      return;
    };
    if self.cache.is_fresh(&key) {
      return;
    }
    let Some(request) = collaborator.fetch_request() else {
      return;
    };

    let region = collaborator.region_id().to_string();
    if self.graceful.is_scrolling(&region) {
      let fetch = self.fetch.clone();
      let deferred_key = key.clone();
      self.graceful.defer(DeferredUpdate::new(
        format!("refresh:{key}"),
        region,
        10,
        move || {
          if matches!(fetch.submit(request), SubmitOutcome::Rejected) {
            warn!(key = %deferred_key, "Deferred refresh rejected; serving stale cache");
          }
        },
      ));
    } else {
      match self.fetch.submit(request) {
        SubmitOutcome::Submitted(_) => {
          debug!(key = %key, "Background refresh submitted");
        }
        SubmitOutcome::AlreadyInFlight => {}
        SubmitOutcome::Rejected => {
          warn!(key = %key, "Fetch queue saturated; serving stale cache");
        }
      }
    }
  }
}
