//! Event router: the per-device control loop.
//!
//! Consumes raw input events, resolves them against the active profile and
//! dispatches to the curve transformer, the macro scheduler or straight to
//! the output sink. Runs as a statum state machine on its own tokio task:
//!
//! ```text
//! Initializing ──► Running ──► Draining ──► Stopped
//!                     │            ▲
//!                     └────────────┘
//!              (shutdown / fatal error)
//! ```
//!
//! The select loop owns all scheduler state, so playback needs no locking;
//! profile snapshots arrive over a watch channel and are swapped only
//! after every outgoing session has been cancelled and swept.

use crate::engine::curve;
use crate::engine::resolver::{self, ResolvedAction};
use crate::engine::scheduler::{MacroScheduler, SchedulerError};
use crate::input::event::{ButtonTransition, RawInputEvent};
use crate::output::{OutputAction, OutputSink, SinkError};
use crate::profile::model::{PlaybackPolicy, Profile};
use crate::profile::store::ProfileStore;
use statum::{machine, state};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Interval at which in-flight macros are advanced while no input arrives.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(4);

/// Errors fatal to a router instance. Recoverable conditions (duplicate
/// triggers, empty macros, sink backpressure) are handled in the loop and
/// never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The raw input source hung up. The collector never closes its stream
    /// in normal operation, so this means it died.
    #[error("Input channel error: {0}")]
    ChannelError(String),

    /// The synthetic output device disappeared.
    #[error("Output sink unavailable: {0}")]
    SinkUnavailable(String),

    /// The router task panicked or was aborted.
    #[error("Router task error: {0}")]
    TaskError(String),
}

/// Lifecycle states of the router.
#[state]
#[derive(Debug, Clone)]
pub enum RouterState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

/// Per-device event router with compile-time state safety.
#[machine]
pub struct EventRouter<S: RouterState> {
    name: String,
    store: Arc<ProfileStore>,
    input_receiver: mpsc::Receiver<RawInputEvent>,
    profile_rx: tokio::sync::watch::Receiver<Arc<Profile>>,
    active_profile: Arc<Profile>,
    scheduler: MacroScheduler,
    sink: Box<dyn OutputSink>,
    tick_interval: Duration,
}

impl EventRouter<Initializing> {
    pub fn create(
        name: impl Into<String>,
        store: Arc<ProfileStore>,
        input_receiver: mpsc::Receiver<RawInputEvent>,
        sink: Box<dyn OutputSink>,
        tick_interval: Duration,
    ) -> Self {
        let name = name.into();
        let profile_rx = store.subscribe();
        let active_profile = store.active_profile();
        info!(
            "Initializing event router {} with profile {} ({})",
            name, active_profile.id, active_profile.name
        );

        Self::new(
            name,
            store,
            input_receiver,
            profile_rx,
            active_profile,
            MacroScheduler::new(),
            sink,
            tick_interval,
        )
    }

    pub fn start(self) -> EventRouter<Running> {
        info!("Starting event router: {}", self.name);
        self.transition()
    }
}

impl EventRouter<Running> {
    /// Main loop. Breaks on shutdown signal or fatal error; either way the
    /// router moves to Draining so held synthetic buttons are released.
    pub async fn run_until_shutdown(
        mut self,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> (EventRouter<Draining>, Result<(), RouterError>) {
        info!(
            "Router {} entering main loop ({}ms tick)",
            self.name,
            self.tick_interval.as_millis()
        );
        let mut ticker = tokio::time::interval(self.tick_interval);
        let mut result = Ok(());

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Shutdown signal received for router: {}", self.name);
                    break;
                }

                changed = self.profile_rx.changed() => {
                    match changed {
                        Ok(()) => {
                            if let Err(e) = self.switch_profile() {
                                error!("Router {} failed during profile switch: {}", self.name, e);
                                result = Err(e);
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Profile store dropped, shutting down router: {}", self.name);
                            break;
                        }
                    }
                }

                maybe_event = self.input_receiver.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if let Err(e) = self.route_event(&event).await {
                                error!("Router {} failed routing event: {}", self.name, e);
                                result = Err(e);
                                break;
                            }
                        }
                        None => {
                            result = Err(RouterError::ChannelError(
                                "raw input channel closed".to_string(),
                            ));
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.tick_scheduler(Instant::now()) {
                        error!("Router {} failed advancing playback: {}", self.name, e);
                        result = Err(e);
                        break;
                    }
                }
            }
        }

        (self.transition(), result)
    }

    /// Resolves and dispatches a single raw input event.
    async fn route_event(&mut self, event: &RawInputEvent) -> Result<(), RouterError> {
        match resolver::resolve(event, &self.active_profile) {
            ResolvedAction::Passthrough { button, transition } => {
                let action = match transition {
                    ButtonTransition::Pressed => OutputAction::PressButton(button),
                    ButtonTransition::Released => OutputAction::ReleaseButton(button),
                };
                self.submit(action)
            }

            ResolvedAction::MacroTrigger {
                macro_id,
                trigger,
                transition,
            } => match transition {
                ButtonTransition::Pressed => {
                    let Some(definition) = self.store.macro_by_id(macro_id).await else {
                        warn!(
                            "Trigger {:?} is assigned unknown {}, ignoring press",
                            trigger, macro_id
                        );
                        return Ok(());
                    };
                    let now = Instant::now();
                    match self.scheduler.start(&definition, trigger, now) {
                        // Emit zero-offset actions without waiting a tick.
                        Ok(()) => self.tick_scheduler(now),
                        Err(SchedulerError::AlreadyPlaying(_)) => {
                            debug!("Duplicate trigger {:?} ignored", trigger);
                            Ok(())
                        }
                        Err(err @ SchedulerError::EmptyMacro(_)) => {
                            warn!("Skipping macro on {:?}: {}", trigger, err);
                            Ok(())
                        }
                    }
                }
                ButtonTransition::Released => {
                    if self.active_profile.playback_policy == PlaybackPolicy::HoldToPlay {
                        debug!("Hold-to-play release on {:?}, cancelling", trigger);
                        self.scheduler.cancel(trigger);
                    }
                    Ok(())
                }
            },

            ResolvedAction::AnalogPassthrough { axis, value } => {
                let calibrated =
                    curve::transform(axis, value, &self.active_profile.analog_settings);
                self.submit(OutputAction::SetAxis(axis, calibrated))
            }
        }
    }

    /// Cancels every outgoing session, sweeps the force-releases, then
    /// swaps in the new profile snapshot. Macros defined under one profile
    /// never complete under another's button semantics.
    fn switch_profile(&mut self) -> Result<(), RouterError> {
        let incoming = self.profile_rx.borrow_and_update().clone();
        info!(
            "Router {} switching profile to {} ({}), cancelling {} sessions",
            self.name,
            incoming.id,
            incoming.name,
            self.scheduler.active_sessions()
        );

        self.scheduler.cancel_all();
        self.tick_scheduler(Instant::now())?;
        self.active_profile = incoming;
        Ok(())
    }

    fn tick_scheduler(&mut self, now: Instant) -> Result<(), RouterError> {
        self.scheduler
            .tick(now, self.sink.as_mut())
            .map_err(|e| RouterError::SinkUnavailable(e.to_string()))
    }

    fn submit(&mut self, action: OutputAction) -> Result<(), RouterError> {
        match self.sink.submit(action) {
            Ok(()) => Ok(()),
            // Live passthrough state is superseded by the next event;
            // dropping one sample under backpressure is not fatal.
            Err(SinkError::Backpressure(reason)) => {
                warn!("Dropping passthrough action under backpressure: {}", reason);
                Ok(())
            }
            Err(SinkError::Unavailable(reason)) => Err(RouterError::SinkUnavailable(reason)),
        }
    }
}

impl EventRouter<Draining> {
    /// Cancels all sessions and force-releases held synthetic buttons
    /// before the sink is dropped. Sink failures here are logged, not
    /// propagated; there is nothing further to unwind.
    pub fn drain(mut self) -> EventRouter<Stopped> {
        info!(
            "Draining router {} ({} active sessions)",
            self.name,
            self.scheduler.active_sessions()
        );
        self.scheduler.cancel_all();

        let mut attempts = 0;
        while self.scheduler.active_sessions() > 0 && attempts < 3 {
            if let Err(e) = self.scheduler.tick(Instant::now(), self.sink.as_mut()) {
                warn!("Sink unavailable during drain of {}: {}", self.name, e);
                break;
            }
            attempts += 1;
        }

        info!("Router {} drained", self.name);
        self.transition()
    }
}

impl EventRouter<Stopped> {}

/// Handle owning a router task: spawn, then shutdown awaits the drain.
#[derive(Debug)]
pub struct RouterHandle {
    pub name: String,
    task_handle: Option<JoinHandle<Result<(), RouterError>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl RouterHandle {
    /// Creates the router, moves it to Running and spawns the main loop.
    pub fn spawn(
        name: impl Into<String>,
        store: Arc<ProfileStore>,
        input_receiver: mpsc::Receiver<RawInputEvent>,
        sink: Box<dyn OutputSink>,
        tick_interval: Duration,
    ) -> Self {
        let name = name.into();
        let router =
            EventRouter::create(name.clone(), store, input_receiver, sink, tick_interval).start();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task_name = name.clone();
        let task_handle = tokio::spawn(async move {
            let (draining, result) = router.run_until_shutdown(shutdown_rx).await;
            let _stopped = draining.drain();
            if let Err(ref e) = result {
                error!("Router {} terminated with error: {}", task_name, e);
            } else {
                info!("Router {} terminated cleanly", task_name);
            }
            result
        });

        Self {
            name,
            task_handle: Some(task_handle),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Signals shutdown and waits for the drain to finish.
    pub async fn shutdown(&mut self) -> Result<(), RouterError> {
        debug!("Sending shutdown signal to router: {}", self.name);
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                warn!("Router task already terminated: {}", self.name);
            }
        }

        match self.task_handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| RouterError::TaskError(format!("router task panicked: {}", e)))?,
            None => {
                debug!("Router already shut down: {}", self.name);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ChannelSink;
    use crate::profile::model::{
        AxisCode, AxisTuning, ButtonCode, Macro, MacroAction, MacroId, Profile, ProfileId,
    };
    use chrono::Local;

    fn tap_x_macro() -> Macro {
        Macro::with_actions(
            MacroId(1),
            "tap-x",
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

    fn scenario_profile(policy: PlaybackPolicy) -> Profile {
        let mut profile = Profile::new(ProfileId(1), "scenario");
        profile.active = true;
        profile.playback_policy = policy;
        profile.map_button(ButtonCode::A, ButtonCode::B);
        profile.assign_macro(ButtonCode::A, MacroId(1));
        profile
    }

    fn press(button: ButtonCode) -> RawInputEvent {
        RawInputEvent::Button {
            button,
            transition: ButtonTransition::Pressed,
            timestamp: Local::now(),
        }
    }

    fn release(button: ButtonCode) -> RawInputEvent {
        RawInputEvent::Button {
            button,
            transition: ButtonTransition::Released,
            timestamp: Local::now(),
        }
    }

    fn running_router(
        profile: Profile,
        macros: Vec<Macro>,
    ) -> (
        EventRouter<Running>,
        Arc<ProfileStore>,
        mpsc::Receiver<OutputAction>,
    ) {
        let store = Arc::new(ProfileStore::new(vec![profile], macros));
        let (_input_tx, input_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(64);
        let router = EventRouter::create(
            "test-router",
            store.clone(),
            input_rx,
            Box::new(ChannelSink::new(out_tx)),
            DEFAULT_TICK_INTERVAL,
        )
        .start();
        (router, store, out_rx)
    }

    fn drain_outputs(rx: &mut mpsc::Receiver<OutputAction>) -> Vec<OutputAction> {
        let mut actions = Vec::new();
        while let Ok(action) = rx.try_recv() {
            actions.push(action);
        }
        actions
    }

    #[tokio::test]
    async fn macro_trigger_plays_macro_instead_of_remap() {
        let (mut router, _store, mut out_rx) =
            running_router(scenario_profile(PlaybackPolicy::PlayToCompletion), vec![
                tap_x_macro(),
            ]);

        let start = Instant::now();
        router.route_event(&press(ButtonCode::A)).await.unwrap();

        // press(X) goes out immediately; no remapped B anywhere.
        let actions = drain_outputs(&mut out_rx);
        assert_eq!(actions, vec![OutputAction::PressButton(ButtonCode::X)]);

        router
            .tick_scheduler(start + Duration::from_millis(60))
            .unwrap();
        let actions = drain_outputs(&mut out_rx);
        assert_eq!(actions, vec![OutputAction::ReleaseButton(ButtonCode::X)]);
    }

    #[tokio::test]
    async fn unmapped_and_remapped_buttons_pass_through() {
        let (mut router, _store, mut out_rx) =
            running_router(scenario_profile(PlaybackPolicy::PlayToCompletion), vec![
                tap_x_macro(),
            ]);

        router.route_event(&press(ButtonCode::Y)).await.unwrap();
        router.route_event(&release(ButtonCode::Y)).await.unwrap();

        assert_eq!(
            drain_outputs(&mut out_rx),
            vec![
                OutputAction::PressButton(ButtonCode::Y),
                OutputAction::ReleaseButton(ButtonCode::Y),
            ]
        );
    }

    #[tokio::test]
    async fn play_to_completion_ignores_trigger_release() {
        let (mut router, _store, mut out_rx) =
            running_router(scenario_profile(PlaybackPolicy::PlayToCompletion), vec![
                tap_x_macro(),
            ]);

        let start = Instant::now();
        router.route_event(&press(ButtonCode::A)).await.unwrap();
        router.route_event(&release(ButtonCode::A)).await.unwrap();

        router
            .tick_scheduler(start + Duration::from_millis(60))
            .unwrap();
        let actions = drain_outputs(&mut out_rx);
        assert_eq!(
            actions,
            vec![
                OutputAction::PressButton(ButtonCode::X),
                OutputAction::ReleaseButton(ButtonCode::X),
            ]
        );
    }

    #[tokio::test]
    async fn hold_to_play_release_cancels_session() {
        let (mut router, _store, mut out_rx) = running_router(
            scenario_profile(PlaybackPolicy::HoldToPlay),
            vec![tap_x_macro()],
        );

        let start = Instant::now();
        router.route_event(&press(ButtonCode::A)).await.unwrap();
        router.route_event(&release(ButtonCode::A)).await.unwrap();
        router
            .tick_scheduler(start + Duration::from_millis(1))
            .unwrap();

        // press(X) then the forced release; the scheduled release at 50ms
        // must never fire.
        let actions = drain_outputs(&mut out_rx);
        assert_eq!(
            actions,
            vec![
                OutputAction::PressButton(ButtonCode::X),
                OutputAction::ReleaseButton(ButtonCode::X),
            ]
        );
        router
            .tick_scheduler(start + Duration::from_millis(60))
            .unwrap();
        assert!(drain_outputs(&mut out_rx).is_empty());
    }

    #[tokio::test]
    async fn axis_events_are_calibrated_before_forwarding() {
        let mut profile = scenario_profile(PlaybackPolicy::PlayToCompletion);
        profile.analog_settings.set_tuning(
            AxisCode::LeftStickX,
            AxisTuning {
                deadzone: 0.1,
                curve_exponent: 1.0,
                sensitivity: 1.0,
                invert: true,
            },
        );
        let (mut router, _store, mut out_rx) = running_router(profile, vec![]);

        router
            .route_event(&RawInputEvent::Axis {
                axis: AxisCode::LeftStickX,
                value: 0.05,
                timestamp: Local::now(),
            })
            .await
            .unwrap();
        router
            .route_event(&RawInputEvent::Axis {
                axis: AxisCode::LeftStickX,
                value: 1.0,
                timestamp: Local::now(),
            })
            .await
            .unwrap();

        let actions = drain_outputs(&mut out_rx);
        assert_eq!(
            actions,
            vec![
                OutputAction::SetAxis(AxisCode::LeftStickX, 0.0),
                OutputAction::SetAxis(AxisCode::LeftStickX, -1.0),
            ]
        );
    }

    #[tokio::test]
    async fn profile_switch_cancels_in_flight_macro() {
        let mut other = Profile::new(ProfileId(2), "other");
        other.playback_policy = PlaybackPolicy::PlayToCompletion;

        let store = Arc::new(ProfileStore::new(
            vec![scenario_profile(PlaybackPolicy::PlayToCompletion), other],
            vec![tap_x_macro()],
        ));
        let (_input_tx, input_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let mut router = EventRouter::create(
            "switch-test",
            store.clone(),
            input_rx,
            Box::new(ChannelSink::new(out_tx)),
            DEFAULT_TICK_INTERVAL,
        )
        .start();

        let start = Instant::now();
        router.route_event(&press(ButtonCode::A)).await.unwrap();
        assert_eq!(
            drain_outputs(&mut out_rx),
            vec![OutputAction::PressButton(ButtonCode::X)]
        );

        store.activate(ProfileId(2)).await.unwrap();
        router.switch_profile().unwrap();

        // Cancellation force-releases the held X; the scheduled release
        // from the old profile's macro never arrives afterwards.
        assert_eq!(
            drain_outputs(&mut out_rx),
            vec![OutputAction::ReleaseButton(ButtonCode::X)]
        );
        router
            .tick_scheduler(start + Duration::from_millis(100))
            .unwrap();
        assert!(drain_outputs(&mut out_rx).is_empty());

        // Under the new profile, A is an ordinary button again.
        router.route_event(&press(ButtonCode::A)).await.unwrap();
        assert_eq!(
            drain_outputs(&mut out_rx),
            vec![OutputAction::PressButton(ButtonCode::A)]
        );
    }

    #[tokio::test]
    async fn duplicate_trigger_press_is_ignored() {
        let (mut router, _store, mut out_rx) =
            running_router(scenario_profile(PlaybackPolicy::PlayToCompletion), vec![
                tap_x_macro(),
            ]);

        router.route_event(&press(ButtonCode::A)).await.unwrap();
        router.route_event(&press(ButtonCode::A)).await.unwrap();

        // One session, one press(X).
        assert_eq!(
            drain_outputs(&mut out_rx),
            vec![OutputAction::PressButton(ButtonCode::X)]
        );
    }

    #[tokio::test]
    async fn sink_loss_is_fatal_to_the_router() {
        let (out_tx, out_rx) = mpsc::channel(64);
        drop(out_rx);
        let store = Arc::new(ProfileStore::new(
            vec![scenario_profile(PlaybackPolicy::PlayToCompletion)],
            vec![tap_x_macro()],
        ));
        let (_input_tx, input_rx) = mpsc::channel(16);
        let mut router = EventRouter::create(
            "dead-sink",
            store,
            input_rx,
            Box::new(ChannelSink::new(out_tx)),
            DEFAULT_TICK_INTERVAL,
        )
        .start();

        let err = router.route_event(&press(ButtonCode::Y)).await.unwrap_err();
        assert!(matches!(err, RouterError::SinkUnavailable(_)));
    }

    #[tokio::test]
    async fn handle_spawns_and_shuts_down_cleanly() {
        let store = Arc::new(ProfileStore::new(
            vec![scenario_profile(PlaybackPolicy::PlayToCompletion)],
            vec![tap_x_macro()],
        ));
        let (input_tx, input_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(64);

        let mut handle = RouterHandle::spawn(
            "spawned",
            store,
            input_rx,
            Box::new(ChannelSink::new(out_tx)),
            DEFAULT_TICK_INTERVAL,
        );

        input_tx.send(press(ButtonCode::A)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        handle.shutdown().await.unwrap();
        let actions = drain_outputs(&mut out_rx);
        assert_eq!(
            actions,
            vec![
                OutputAction::PressButton(ButtonCode::X),
                OutputAction::ReleaseButton(ButtonCode::X),
            ]
        );
    }
}
