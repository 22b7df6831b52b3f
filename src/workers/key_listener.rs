use log::{debug, info, warn};
use rdev::{EventType, Key, listen};
use tokio_util::sync::CancellationToken;

/// Global shortcuts understood while relaying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hotkey {
    Stop,
}

/// Listen for global key presses on a dedicated thread and cancel `cancel`
/// on Escape or Ctrl+Q.
///
/// `rdev::listen` never returns on success, so the thread lives until the
/// process exits.
pub fn spawn_stop_listener(cancel: CancellationToken) {
    std::thread::spawn(move || {
        let mut keys = KeyState::new();
        let result = listen(move |event| {
            if let Some(Hotkey::Stop) = keys.mapping(event.event_type)
                && !cancel.is_cancelled()
            {
                info!("Stop key pressed");
                cancel.cancel();
            }
        });
        if let Err(e) = result {
            warn!("Global key listener unavailable: {:?}", e);
        }
    });
    debug!("Global key listener started");
}

struct KeyState {
    control: bool,
}

impl KeyState {
    pub fn new() -> Self {
        KeyState { control: false }
    }

    pub fn mapping(&mut self, event: EventType) -> Option<Hotkey> {
        match event {
            EventType::KeyPress(key) => {
                self.set_modifier(key, true);
                None
            }
            EventType::KeyRelease(key) => match key {
                Key::ControlLeft | Key::ControlRight => {
                    self.set_modifier(key, false);
                    None
                }
                Key::Escape => Some(Hotkey::Stop),
                Key::KeyQ if self.control => Some(Hotkey::Stop),
                _ => None,
            },
            _ => None,
        }
    }

    fn set_modifier(&mut self, key: Key, is_pressed: bool) {
        if matches!(key, Key::ControlLeft | Key::ControlRight) {
            self.control = is_pressed;
        }
    }
}
