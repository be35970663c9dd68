use splash::config::{ConfigStore, SCHEMA_VERSION};
use splash::server::SplashServer;
use splash::state::AppState;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("splash=info".parse().expect("valid log directive")),
        )
        .init();

    // Site root: configuration, default pages, and static assets resolve
    // against this directory
    let root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    info!(name = env!("CARGO_PKG_NAME"), version = SCHEMA_VERSION, root = %root.display(), "Starting splash server");

    let store = ConfigStore::new(&root);
    let state = AppState::load(store).map_err(|e| {
        error!(error = %e, "Failed to persist configuration");
        e
    })?;

    {
        let snapshot = state.snapshot();
        info!(
            listen_port = snapshot.config.listen_port(),
            public_port = snapshot.config.public_port(),
            instance_id = snapshot.config.instance_id(),
            projects = snapshot.registry.len(),
            pages = snapshot.pages.len(),
            "Configuration loaded"
        );
    }

    // Write PID file if configured (with exclusive lock on Unix)
    let pid_file_path = state
        .snapshot()
        .config
        .pid_file()
        .map(|p| state.root().join(p));
    let _pid_file = if let Some(ref path) = pid_file_path {
        let pid_file = PidFile::create(path)?;
        info!(path = %path.display(), "PID file written and locked");
        Some(pid_file)
    } else {
        None
    };

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listen_port: u16 = {
        let snapshot = state.snapshot();
        let port = snapshot.config.listen_port().to_string();
        port.parse().map_err(|e| {
            error!(listen_port = %port, error = %e, "Invalid listen port");
            anyhow::anyhow!("Invalid listen port '{}': {}", port, e)
        })?
    };

    let addr: SocketAddr = ([0, 0, 0, 0], listen_port).into();

    // Bind before spawning: a bind failure is fatal and must exit non-zero
    let server = SplashServer::bind(addr, Arc::clone(&state), shutdown_rx.clone()).await?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Splash server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM) or config reload (SIGHUP)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("Failed to install SIGHUP handler");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT (Ctrl+C), shutting down...");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading configuration...");
                    if let Err(e) = state.reload() {
                        error!(error = %e, "Failed to reload configuration");
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown and wait for the server with a bounded timeout
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    // Clean up PID file
    if let Some(ref path) = pid_file_path {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove PID file");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// PID file handle that maintains an exclusive lock
#[cfg(unix)]
struct PidFile {
    _file: std::fs::File,
}

#[cfg(unix)]
impl PidFile {
    fn create(path: &Path) -> anyhow::Result<Self> {
        use std::os::unix::io::AsRawFd;

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        // Try to acquire exclusive lock (non-blocking)
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

        if result != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                anyhow::bail!("Another instance is already running (PID file is locked)");
            }
            return Err(err.into());
        }

        // Write PID
        let pid = std::process::id();
        use std::io::Write;
        writeln!(&file, "{}", pid)?;

        // Keep the file handle open to maintain the lock
        Ok(Self { _file: file })
    }
}

#[cfg(not(unix))]
struct PidFile;

#[cfg(not(unix))]
impl PidFile {
    fn create(path: &Path) -> anyhow::Result<Self> {
        let pid = std::process::id();
        let mut file = std::fs::File::create(path)?;
        use std::io::Write;
        writeln!(file, "{}", pid)?;
        Ok(Self)
    }
}
