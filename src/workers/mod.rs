//! Background workers that can stop a running relay from outside
//!
//! Signal handling is always present; the global key listener needs the
//! `hotkeys` feature.

#[cfg(feature = "hotkeys")]
pub mod key_listener;
pub mod signals;

#[cfg(feature = "hotkeys")]
pub use key_listener::spawn_stop_listener;
pub use signals::install_stop_handler;
