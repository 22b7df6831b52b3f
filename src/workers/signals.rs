use log::info;
use tokio_util::sync::CancellationToken;

/// Cancel `cancel` on SIGINT, SIGTERM or SIGHUP.
///
/// A second signal while the relay is still draining exits right away.
pub fn install_stop_handler(cancel: CancellationToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            std::process::exit(130);
        }
        info!("Signal received, stopping");
        cancel.cancel();
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::{Duration, Instant};

    #[test]
    fn test_sigterm_cancels_instead_of_killing() {
        let cancel = CancellationToken::new();
        install_stop_handler(cancel.clone()).unwrap();

        let status = Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let deadline = Instant::now() + Duration::from_secs(2);
        while !cancel.is_cancelled() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(cancel.is_cancelled());
    }
}
