use thiserror::Error;

/// Failures of a single synchronization attempt. All are recoverable: the
/// next trigger simply tries again.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("network not connected, skipping time resolve")]
    NotConnected,
    #[error("network time resolve returned no timestamp")]
    ResolutionFailed,
    #[error("could not write resolved time to RTC: {0}")]
    RtcWrite(#[source] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("timezone offset {0} outside -12..=14")]
    InvalidOffset(i32),
    #[error("failed to persist timezone: {0}")]
    PersistError(#[source] anyhow::Error),
    #[error("persistent store unavailable, running in-memory only: {0}")]
    PersistenceUnavailable(#[source] anyhow::Error),
}

/// A dropped display frame. The display loop logs it and keeps going.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("display write failed: {0}")]
    Display(#[source] anyhow::Error),
    #[error("RTC read failed: {0}")]
    ClockRead(#[source] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum BootError {
    #[error("RTC not found: {0}")]
    HardwareNotFound(#[source] anyhow::Error),
}
