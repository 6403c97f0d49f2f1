//! Raw input source adapter over gilrs.
//!
//! Polls the active gamepad and feeds [`RawInputEvent`]s into the router
//! channel. Button edges and per-axis samples are forwarded with chrono
//! timestamps; profile-dependent calibration (dead-zones, curves) happens
//! later in the engine, the collector only suppresses sub-noise-floor axis
//! chatter so idle sticks don't flood the channel.

use crate::input::event::{ButtonTransition, RawInputEvent};
use crate::profile::model::{AxisCode, ButtonCode};
use chrono::Local;
use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use statum::{machine, state};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Collector settings.
#[derive(Clone, Debug)]
pub struct CollectorSettings {
    /// Minimum change since the last forwarded sample of an axis.
    pub axis_noise_floor: f32,

    /// Sleep between hardware polls, in microseconds.
    pub poll_interval_us: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            axis_noise_floor: 0.01,
            poll_interval_us: 500,
        }
    }
}

/// Collector errors.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),

    #[error("Failed to send event: {0}")]
    EventSendError(String),
}

#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

/// Gamepad poller with compile-time lifecycle states.
#[machine]
pub struct InputCollector<S: CollectionState> {
    gilrs: Gilrs,
    active_gamepad: Option<GamepadId>,
    settings: CollectorSettings,
    event_sender: mpsc::Sender<RawInputEvent>,
    last_axis_values: HashMap<AxisCode, f32>,
}

impl InputCollector<Initializing> {
    pub fn create(
        settings: Option<CollectorSettings>,
        event_sender: mpsc::Sender<RawInputEvent>,
    ) -> Result<Self, CollectorError> {
        let settings = settings.unwrap_or_default();
        debug!("Creating input collector with settings: {:?}", settings);

        let gilrs = Gilrs::new().map_err(|e| {
            error!("Failed to initialize gilrs: {}", e);
            CollectorError::InitializationError(e.to_string())
        })?;

        Ok(Self::new(gilrs, None, settings, event_sender, HashMap::new()))
    }

    /// Selects a gamepad and transitions to the collecting state.
    pub fn initialize(mut self) -> Result<InputCollector<Collecting>, CollectorError> {
        let gamepads: Vec<(GamepadId, Gamepad<'_>)> = self.gilrs.gamepads().collect();

        if gamepads.is_empty() {
            warn!("No gamepad connected, collector starts idle");
        } else {
            info!("Found {} gamepads:", gamepads.len());
            for (idx, (id, gamepad)) in gamepads.iter().enumerate() {
                info!("  [{}] ID: {}, Name: {}", idx, id, gamepad.name());
            }
            let (id, gamepad) = &gamepads[0];
            self.active_gamepad = Some(*id);
            info!("Selected gamepad: {} ({})", gamepad.name(), id);
        }

        Ok(self.transition())
    }
}

impl InputCollector<Collecting> {
    /// Drains pending gilrs events; returns false once the router side of
    /// the channel is gone and the collector should detach.
    pub fn collect_pending_events(&mut self) -> Result<bool, CollectorError> {
        while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            match self.active_gamepad {
                Some(active_id) if id != active_id => {
                    debug!("Skipping event from non-active gamepad: {:?}", id);
                    continue;
                }
                None => {
                    // Adopt the first gamepad that produces events.
                    info!("Adopting gamepad {:?} as active", id);
                    self.active_gamepad = Some(id);
                }
                _ => {}
            }

            let Some(raw_event) = self.convert_event(event) else {
                continue;
            };

            match self.event_sender.try_send(raw_event) {
                Ok(()) => debug!("Forwarded event: {:?}", raw_event),
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    warn!("Input channel full, dropping {:?}", dropped);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    info!("Input channel closed, detaching collector");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Poll loop; runs until the consumer detaches.
    pub fn run_collection_loop(&mut self) -> Result<(), CollectorError> {
        info!("Starting input collection loop");
        let poll_interval = std::time::Duration::from_micros(self.settings.poll_interval_us);

        loop {
            match self.collect_pending_events() {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(e) => {
                    error!("Error collecting events: {}", e);
                }
            }
            std::thread::sleep(poll_interval);
        }
    }

    fn convert_event(&mut self, event: EventType) -> Option<RawInputEvent> {
        let now = Local::now();

        match event {
            EventType::ButtonPressed(button, _) => map_button(button).map(|button| {
                info!("Button pressed: {:?}", button);
                RawInputEvent::Button {
                    button,
                    transition: ButtonTransition::Pressed,
                    timestamp: now,
                }
            }),
            EventType::ButtonReleased(button, _) => map_button(button).map(|button| {
                info!("Button released: {:?}", button);
                RawInputEvent::Button {
                    button,
                    transition: ButtonTransition::Released,
                    timestamp: now,
                }
            }),
            EventType::AxisChanged(axis, value, _) => {
                let axis = map_axis(axis)?;
                let last = self.last_axis_values.get(&axis).copied().unwrap_or(0.0);
                if (value - last).abs() < self.settings.axis_noise_floor && value != 0.0 {
                    return None;
                }
                self.last_axis_values.insert(axis, value);
                Some(RawInputEvent::Axis {
                    axis,
                    value,
                    timestamp: now,
                })
            }
            EventType::ButtonRepeated(button, _) => {
                debug!("Button repeat ignored: {:?}", button);
                None
            }
            EventType::Connected => {
                info!("Controller connected event detected");
                None
            }
            EventType::Disconnected => {
                warn!("Controller disconnected event detected");
                None
            }
            _ => {
                debug!("Unhandled event type: {:?}", event);
                None
            }
        }
    }
}

/// Public interface for spawning and running the collector.
pub struct CollectorHandle {
    event_sender: mpsc::Sender<RawInputEvent>,
}

impl CollectorHandle {
    /// Creates a collector and runs its poll loop on a blocking task. The
    /// task ends on its own when the router detaches from the channel.
    pub fn spawn(
        settings: Option<CollectorSettings>,
        event_sender: mpsc::Sender<RawInputEvent>,
    ) -> Result<Self, CollectorError> {
        info!("Spawning input collector");
        let sender_clone = event_sender.clone();

        let collector = InputCollector::create(settings, event_sender)?;

        tokio::task::spawn_blocking(move || match collector.initialize() {
            Ok(mut collecting) => {
                if let Err(e) = collecting.run_collection_loop() {
                    error!("Collector task terminated with error: {}", e);
                } else {
                    info!("Collector detached");
                }
            }
            Err(e) => {
                error!("Failed to initialize input collector: {}", e);
            }
        });

        Ok(Self {
            event_sender: sender_clone,
        })
    }

    /// Extra sender into the raw event channel (used by the recorder tap).
    pub fn event_sender(&self) -> mpsc::Sender<RawInputEvent> {
        self.event_sender.clone()
    }
}

fn map_button(button: Button) -> Option<ButtonCode> {
    match button {
        Button::South => Some(ButtonCode::A),
        Button::East => Some(ButtonCode::B),
        Button::West => Some(ButtonCode::Y),
        Button::North => Some(ButtonCode::X),
        Button::Start => Some(ButtonCode::Start),
        Button::Select => Some(ButtonCode::Select),
        Button::Mode => Some(ButtonCode::Guide),
        Button::LeftTrigger => Some(ButtonCode::LeftBumper),
        Button::RightTrigger => Some(ButtonCode::RightBumper),
        Button::LeftTrigger2 => Some(ButtonCode::LeftTriggerButton),
        Button::RightTrigger2 => Some(ButtonCode::RightTriggerButton),
        Button::LeftThumb => Some(ButtonCode::LeftStick),
        Button::RightThumb => Some(ButtonCode::RightStick),
        Button::DPadUp => Some(ButtonCode::DPadUp),
        Button::DPadDown => Some(ButtonCode::DPadDown),
        Button::DPadLeft => Some(ButtonCode::DPadLeft),
        Button::DPadRight => Some(ButtonCode::DPadRight),
        _ => None,
    }
}

fn map_axis(axis: Axis) -> Option<AxisCode> {
    match axis {
        Axis::LeftStickX => Some(AxisCode::LeftStickX),
        Axis::LeftStickY => Some(AxisCode::LeftStickY),
        Axis::RightStickX => Some(AxisCode::RightStickX),
        Axis::RightStickY => Some(AxisCode::RightStickY),
        Axis::LeftZ => Some(AxisCode::LeftTrigger),
        Axis::RightZ => Some(AxisCode::RightTrigger),
        _ => None,
    }
}
