//! The readiness barrier: the leader parameter server writes a marker file into the shared
//! experiment directory once the vocabularies are saved, workers wait until they see it.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use log::info;
use tokio::time;

/// File name of the readiness marker.
pub const READY_MARKER: &str = "READY";

/// Interval between two looks at the marker.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What a worker observes when it looks for the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
}

/// Returns the marker's path inside `expdir`.
pub fn marker_path(expdir: &Path) -> PathBuf {
    expdir.join(READY_MARKER)
}

/// Looks for the marker once.
pub fn check(expdir: &Path) -> io::Result<Readiness> {
    match fs::metadata(marker_path(expdir)) {
        Ok(_) => Ok(Readiness::Ready),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Readiness::Pending),
        Err(e) => Err(e),
    }
}

/// Creates the zero byte marker, signaling that the shared setup is complete.
pub fn mark_ready(expdir: &Path) -> io::Result<()> {
    fs::File::create(marker_path(expdir))?;
    Ok(())
}

/// Blocks until the marker exists, looking for it every `interval`. There is no timeout.
///
/// # Arguments
/// * `expdir` - The shared experiment directory.
/// * `interval` - Time between two looks.
pub async fn wait_ready(expdir: &Path, interval: Duration) -> io::Result<()> {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match check(expdir)? {
            Readiness::Ready => return Ok(()),
            Readiness::Pending => info!("waiting for {}", marker_path(expdir).display()),
        }
    }
}
