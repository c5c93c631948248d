//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT (Ctrl+C) or SIGTERM (graceful container stop)
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)

/// Which signal ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Interrupt,
    Terminate,
}

/// Block until the process is asked to terminate.
#[cfg(unix)]
pub async fn wait_for_termination() -> std::io::Result<Termination> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| Termination::Interrupt),
        _ = terminate.recv() => Ok(Termination::Terminate),
    }
}

/// Block until the process is asked to terminate.
#[cfg(not(unix))]
pub async fn wait_for_termination() -> std::io::Result<Termination> {
    tokio::signal::ctrl_c().await?;
    Ok(Termination::Interrupt)
}
