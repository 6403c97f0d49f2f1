//! Macro scheduler: owns playback sessions and emits their actions on time.
//!
//! One session per trigger button, advanced by `tick(now)` from the router
//! loop. A tick that arrives late emits every elapsed action back-to-back
//! in sequence order, so playback is exactly-once and never reordered even
//! when the loop stalls. Cancellation is flag-then-sweep: `cancel` marks
//! the session, the next tick force-releases whatever the session still
//! holds down and removes it without emitting further actions.

use crate::output::{OutputAction, OutputSink, SinkError};
use crate::profile::model::{ButtonCode, Macro, MacroAction, MacroId};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced by [`MacroScheduler::start`].
///
/// Both are recoverable: duplicate triggers are ignored by the caller,
/// empty macros are skipped with a warning.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Trigger {0:?} already has an active playback session")]
    AlreadyPlaying(ButtonCode),

    #[error("{0} has no actions to play")]
    EmptyMacro(MacroId),
}

/// One emission lowered from a macro action: what to submit, and when,
/// relative to session start.
#[derive(Debug, Clone, Copy)]
struct PlannedEmit {
    offset: Duration,
    action: OutputAction,
}

/// Runtime state of one in-progress macro playback.
///
/// Owned exclusively by the scheduler; the router only observes trigger
/// transitions and requests creation or cancellation.
#[derive(Debug)]
struct PlaybackSession {
    macro_id: MacroId,
    trigger: ButtonCode,
    started_at: Instant,
    plan: Vec<PlannedEmit>,
    cursor: usize,
    cancelled: bool,
    /// Buttons this session has driven down and not yet released, in press
    /// order. Force-released on cancellation so no synthetic button is
    /// left stuck.
    held_buttons: Vec<ButtonCode>,
}

impl PlaybackSession {
    fn new(definition: &Macro, trigger: ButtonCode, now: Instant) -> Self {
        Self {
            macro_id: definition.id,
            trigger,
            started_at: now,
            plan: lower_actions(definition.actions()),
            cursor: 0,
            cancelled: false,
            held_buttons: Vec::new(),
        }
    }

    fn is_exhausted(&self) -> bool {
        self.cursor >= self.plan.len()
    }

    fn note_emitted(&mut self, action: OutputAction) {
        match action {
            OutputAction::PressButton(button) => self.held_buttons.push(button),
            OutputAction::ReleaseButton(button) => {
                if let Some(index) = self.held_buttons.iter().position(|&held| held == button) {
                    self.held_buttons.remove(index);
                }
            }
            OutputAction::SetAxis(..) => {}
        }
    }
}

/// Lowers the action sequence into an order-preserving emission plan with
/// absolute offsets. `Hold` becomes a press and a deferred release; `Wait`
/// only advances the clock.
fn lower_actions(actions: &[MacroAction]) -> Vec<PlannedEmit> {
    let mut plan = Vec::with_capacity(actions.len());
    let mut offset = Duration::ZERO;

    for action in actions {
        match *action {
            MacroAction::Press { button, delay_ms } => {
                offset += Duration::from_millis(delay_ms);
                plan.push(PlannedEmit {
                    offset,
                    action: OutputAction::PressButton(button),
                });
            }
            MacroAction::Release { button, delay_ms } => {
                offset += Duration::from_millis(delay_ms);
                plan.push(PlannedEmit {
                    offset,
                    action: OutputAction::ReleaseButton(button),
                });
            }
            MacroAction::Hold {
                button,
                hold_ms,
                delay_ms,
            } => {
                offset += Duration::from_millis(delay_ms);
                plan.push(PlannedEmit {
                    offset,
                    action: OutputAction::PressButton(button),
                });
                offset += Duration::from_millis(hold_ms);
                plan.push(PlannedEmit {
                    offset,
                    action: OutputAction::ReleaseButton(button),
                });
            }
            MacroAction::SetAxis {
                axis,
                value,
                delay_ms,
            } => {
                offset += Duration::from_millis(delay_ms);
                plan.push(PlannedEmit {
                    offset,
                    action: OutputAction::SetAxis(axis, value),
                });
            }
            MacroAction::Wait { wait_ms } => {
                offset += Duration::from_millis(wait_ms);
            }
        }
    }

    plan
}

/// Owns all active playback sessions for one router.
#[derive(Debug, Default)]
pub struct MacroScheduler {
    sessions: HashMap<ButtonCode, PlaybackSession>,
}

impl MacroScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts playback of `definition` for `trigger`.
    ///
    /// At most one session exists per trigger; a second press while one is
    /// active fails with `AlreadyPlaying`, which callers treat as a benign
    /// duplicate and ignore.
    pub fn start(
        &mut self,
        definition: &Macro,
        trigger: ButtonCode,
        now: Instant,
    ) -> Result<(), SchedulerError> {
        if self.sessions.contains_key(&trigger) {
            return Err(SchedulerError::AlreadyPlaying(trigger));
        }
        if definition.is_empty() {
            return Err(SchedulerError::EmptyMacro(definition.id));
        }

        let session = PlaybackSession::new(definition, trigger, now);
        info!(
            "Starting playback of {} ({} emissions, {}ms) on trigger {:?}",
            definition.id,
            session.plan.len(),
            definition.total_duration_ms(),
            trigger
        );
        self.sessions.insert(trigger, session);
        Ok(())
    }

    /// Flags the session on `trigger` for cancellation. The next tick
    /// removes it after force-releasing anything it still holds down.
    pub fn cancel(&mut self, trigger: ButtonCode) {
        if let Some(session) = self.sessions.get_mut(&trigger) {
            debug!(
                "Cancelling playback of {} on trigger {:?}",
                session.macro_id, trigger
            );
            session.cancelled = true;
        }
    }

    /// Flags every active session for cancellation. Used on profile
    /// switches and shutdown.
    pub fn cancel_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.cancelled = true;
        }
        if !self.sessions.is_empty() {
            info!("Cancelled {} active playback sessions", self.sessions.len());
        }
    }

    pub fn is_playing(&self, trigger: ButtonCode) -> bool {
        self.sessions.contains_key(&trigger)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Advances every session to `now`, emitting due actions in sequence
    /// order. Completed and cancelled sessions are removed. Sessions on
    /// different triggers are independent; no ordering is forced between
    /// them.
    ///
    /// Backpressure from the sink leaves the session cursor in place so the
    /// pending emission retries on the next tick; only a vanished sink
    /// aborts, and that error is fatal to the owning router.
    pub fn tick(&mut self, now: Instant, sink: &mut dyn OutputSink) -> Result<(), SinkError> {
        let mut finished: Vec<ButtonCode> = Vec::new();

        for (trigger, session) in self.sessions.iter_mut() {
            if session.cancelled {
                // Symmetry guarantee: a cancelled macro never leaves a
                // synthetic button stuck down.
                while let Some(&button) = session.held_buttons.first() {
                    match sink.submit(OutputAction::ReleaseButton(button)) {
                        Ok(()) => {
                            session.held_buttons.remove(0);
                            debug!("Force-released {:?} for cancelled {}", button, session.macro_id);
                        }
                        Err(SinkError::Backpressure(reason)) => {
                            warn!("Deferring force-release of {:?}: {}", button, reason);
                            break;
                        }
                        Err(err) => return Err(err),
                    }
                }
                if session.held_buttons.is_empty() {
                    info!("Removed cancelled session for {}", session.macro_id);
                    finished.push(*trigger);
                }
                continue;
            }

            let elapsed = now.saturating_duration_since(session.started_at);
            while let Some(&PlannedEmit { offset, action }) = session.plan.get(session.cursor) {
                if offset > elapsed {
                    break;
                }
                match sink.submit(action) {
                    Ok(()) => {
                        session.note_emitted(action);
                        session.cursor += 1;
                    }
                    Err(SinkError::Backpressure(reason)) => {
                        warn!(
                            "Deferring emission {} of {} to next tick: {}",
                            session.cursor, session.macro_id, reason
                        );
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }

            if session.is_exhausted() {
                // An unbalanced sequence (press without release) would
                // otherwise leave the output stuck down forever.
                while let Some(&button) = session.held_buttons.first() {
                    warn!(
                        "{} completed with {:?} still pressed, force-releasing",
                        session.macro_id, button
                    );
                    match sink.submit(OutputAction::ReleaseButton(button)) {
                        Ok(()) => {
                            session.held_buttons.remove(0);
                        }
                        Err(SinkError::Backpressure(_)) => break,
                        Err(err) => return Err(err),
                    }
                }
                if session.held_buttons.is_empty() {
                    debug!("Playback of {} completed", session.macro_id);
                    finished.push(*trigger);
                }
            }
        }

        for trigger in finished {
            self.sessions.remove(&trigger);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::testing::RecordingSink;
    use crate::profile::model::AxisCode;

    fn press_release_macro(id: u64) -> Macro {
        Macro::with_actions(
            MacroId(id),
            "tap",
            "",
            vec![
                MacroAction::Press {
                    button: ButtonCode::X,
                    delay_ms: 0,
                },
                MacroAction::Release {
                    button: ButtonCode::X,
                    delay_ms: 50,
                },
            ],
        )
    }

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn emits_actions_at_their_offsets() {
        let mut scheduler = MacroScheduler::new();
        let mut sink = RecordingSink::default();
        let base = Instant::now();

        scheduler
            .start(&press_release_macro(1), ButtonCode::A, base)
            .unwrap();

        scheduler.tick(base, &mut sink).unwrap();
        assert_eq!(sink.actions, vec![OutputAction::PressButton(ButtonCode::X)]);

        scheduler.tick(at(base, 49), &mut sink).unwrap();
        assert_eq!(sink.actions.len(), 1);
        assert!(scheduler.is_playing(ButtonCode::A));

        scheduler.tick(at(base, 50), &mut sink).unwrap();
        assert_eq!(
            sink.actions,
            vec![
                OutputAction::PressButton(ButtonCode::X),
                OutputAction::ReleaseButton(ButtonCode::X),
            ]
        );
        assert!(!scheduler.is_playing(ButtonCode::A));
    }

    #[test]
    fn duplicate_start_is_rejected_while_active() {
        let mut scheduler = MacroScheduler::new();
        let mut sink = RecordingSink::default();
        let base = Instant::now();
        let definition = press_release_macro(1);

        scheduler.start(&definition, ButtonCode::A, base).unwrap();
        let err = scheduler
            .start(&definition, ButtonCode::A, at(base, 10))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyPlaying(ButtonCode::A)));
        assert_eq!(scheduler.active_sessions(), 1);

        // After completion the trigger is free again.
        scheduler.tick(at(base, 100), &mut sink).unwrap();
        assert!(scheduler
            .start(&definition, ButtonCode::A, at(base, 200))
            .is_ok());
    }

    #[test]
    fn empty_macro_is_rejected() {
        let mut scheduler = MacroScheduler::new();
        let empty = Macro::new(MacroId(3), "nothing");
        let err = scheduler
            .start(&empty, ButtonCode::B, Instant::now())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::EmptyMacro(MacroId(3))));
        assert!(!scheduler.is_playing(ButtonCode::B));
    }

    #[test]
    fn cancel_after_press_force_releases() {
        let mut scheduler = MacroScheduler::new();
        let mut sink = RecordingSink::default();
        let base = Instant::now();

        scheduler
            .start(&press_release_macro(1), ButtonCode::A, base)
            .unwrap();
        scheduler.tick(base, &mut sink).unwrap();
        assert_eq!(sink.actions, vec![OutputAction::PressButton(ButtonCode::X)]);

        scheduler.cancel(ButtonCode::A);
        scheduler.tick(at(base, 5), &mut sink).unwrap();
        assert_eq!(
            sink.actions,
            vec![
                OutputAction::PressButton(ButtonCode::X),
                OutputAction::ReleaseButton(ButtonCode::X),
            ]
        );
        assert!(!scheduler.is_playing(ButtonCode::A));

        // The scheduled release at 50ms must not fire after removal.
        scheduler.tick(at(base, 60), &mut sink).unwrap();
        assert_eq!(sink.actions.len(), 2);
    }

    #[test]
    fn cancel_before_any_press_emits_nothing() {
        let mut scheduler = MacroScheduler::new();
        let mut sink = RecordingSink::default();
        let base = Instant::now();
        let delayed = Macro::with_actions(
            MacroId(4),
            "delayed",
            "",
            vec![MacroAction::Press {
                button: ButtonCode::X,
                delay_ms: 500,
            }],
        );

        scheduler.start(&delayed, ButtonCode::A, base).unwrap();
        scheduler.cancel(ButtonCode::A);
        scheduler.tick(at(base, 1), &mut sink).unwrap();

        assert!(sink.actions.is_empty());
        assert!(!scheduler.is_playing(ButtonCode::A));
    }

    #[test]
    fn late_tick_catches_up_in_sequence_order() {
        let mut scheduler = MacroScheduler::new();
        let mut sink = RecordingSink::default();
        let base = Instant::now();
        let combo = Macro::with_actions(
            MacroId(5),
            "combo",
            "",
            vec![
                MacroAction::Press {
                    button: ButtonCode::A,
                    delay_ms: 0,
                },
                MacroAction::Release {
                    button: ButtonCode::A,
                    delay_ms: 30,
                },
                MacroAction::SetAxis {
                    axis: AxisCode::LeftStickX,
                    value: 1.0,
                    delay_ms: 10,
                },
                MacroAction::Hold {
                    button: ButtonCode::B,
                    hold_ms: 20,
                    delay_ms: 10,
                },
            ],
        );

        scheduler.start(&combo, ButtonCode::Y, base).unwrap();
        // A single tick far past the end emits everything, once, in order.
        scheduler.tick(at(base, 1000), &mut sink).unwrap();

        assert_eq!(
            sink.actions,
            vec![
                OutputAction::PressButton(ButtonCode::A),
                OutputAction::ReleaseButton(ButtonCode::A),
                OutputAction::SetAxis(AxisCode::LeftStickX, 1.0),
                OutputAction::PressButton(ButtonCode::B),
                OutputAction::ReleaseButton(ButtonCode::B),
            ]
        );
        assert!(!scheduler.is_playing(ButtonCode::Y));

        scheduler.tick(at(base, 2000), &mut sink).unwrap();
        assert_eq!(sink.actions.len(), 5, "actions must be emitted exactly once");
    }

    #[test]
    fn hold_lowers_to_press_then_deferred_release() {
        let mut scheduler = MacroScheduler::new();
        let mut sink = RecordingSink::default();
        let base = Instant::now();
        let hold = Macro::with_actions(
            MacroId(6),
            "hold",
            "",
            vec![MacroAction::Hold {
                button: ButtonCode::X,
                hold_ms: 120,
                delay_ms: 10,
            }],
        );

        scheduler.start(&hold, ButtonCode::A, base).unwrap();

        scheduler.tick(at(base, 10), &mut sink).unwrap();
        assert_eq!(sink.actions, vec![OutputAction::PressButton(ButtonCode::X)]);

        scheduler.tick(at(base, 129), &mut sink).unwrap();
        assert_eq!(sink.actions.len(), 1);

        scheduler.tick(at(base, 130), &mut sink).unwrap();
        assert_eq!(sink.actions.len(), 2);
        assert_eq!(
            sink.actions[1],
            OutputAction::ReleaseButton(ButtonCode::X)
        );
        assert!(!scheduler.is_playing(ButtonCode::A));
    }

    #[test]
    fn sessions_on_different_triggers_run_concurrently() {
        let mut scheduler = MacroScheduler::new();
        let mut sink = RecordingSink::default();
        let base = Instant::now();

        scheduler
            .start(&press_release_macro(1), ButtonCode::A, base)
            .unwrap();
        let other = Macro::with_actions(
            MacroId(2),
            "axis",
            "",
            vec![MacroAction::SetAxis {
                axis: AxisCode::RightTrigger,
                value: 1.0,
                delay_ms: 20,
            }],
        );
        scheduler.start(&other, ButtonCode::B, base).unwrap();
        assert_eq!(scheduler.active_sessions(), 2);

        scheduler.tick(at(base, 100), &mut sink).unwrap();
        assert_eq!(scheduler.active_sessions(), 0);
        assert_eq!(sink.actions.len(), 3);
        assert!(sink
            .actions
            .contains(&OutputAction::SetAxis(AxisCode::RightTrigger, 1.0)));
    }

    #[test]
    fn unbalanced_macro_is_released_on_completion() {
        let mut scheduler = MacroScheduler::new();
        let mut sink = RecordingSink::default();
        let base = Instant::now();
        let unbalanced = Macro::with_actions(
            MacroId(7),
            "stuck",
            "",
            vec![MacroAction::Press {
                button: ButtonCode::Y,
                delay_ms: 0,
            }],
        );

        scheduler.start(&unbalanced, ButtonCode::A, base).unwrap();
        scheduler.tick(at(base, 1), &mut sink).unwrap();

        assert_eq!(
            sink.actions,
            vec![
                OutputAction::PressButton(ButtonCode::Y),
                OutputAction::ReleaseButton(ButtonCode::Y),
            ]
        );
        assert!(!scheduler.is_playing(ButtonCode::A));
    }

    #[test]
    fn cancel_all_sweeps_every_session() {
        let mut scheduler = MacroScheduler::new();
        let mut sink = RecordingSink::default();
        let base = Instant::now();

        scheduler
            .start(&press_release_macro(1), ButtonCode::A, base)
            .unwrap();
        scheduler
            .start(&press_release_macro(2), ButtonCode::B, base)
            .unwrap();
        scheduler.tick(base, &mut sink).unwrap();
        assert_eq!(sink.actions.len(), 2); // both presses out

        scheduler.cancel_all();
        scheduler.tick(at(base, 1), &mut sink).unwrap();
        assert_eq!(scheduler.active_sessions(), 0);
        // Two force-releases, one per session.
        assert_eq!(
            sink.actions[2..]
                .iter()
                .filter(|a| matches!(a, OutputAction::ReleaseButton(ButtonCode::X)))
                .count(),
            2
        );
    }
}
