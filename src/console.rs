//! Line-oriented operator console.
//!
//! Stdin is read on its own OS thread and forwarded over a channel. A read
//! blocked on an idle terminal then never holds up process exit after a
//! shutdown request.

use crate::runtime::{ControlCommand, ControlPlane, ControlReply};
use std::future::Future;
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Lines buffered between the stdin thread and the console loop.
const CONSOLE_BACKLOG: usize = 16;

/// Start the stdin reader thread.
///
/// The channel closes when stdin reaches EOF or fails.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(CONSOLE_BACKLOG);

    let spawned = std::thread::Builder::new()
        .name("console-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Console read failed");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Could not start console reader");
    }
    rx
}

/// Resolves once Ctrl-C is received.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Feed console lines and `shutdown` into the control plane until `exit`.
///
/// If the line source closes the server keeps running until `shutdown`
/// resolves. Returns the final reply.
pub async fn run_console<F>(
    control: &ControlPlane,
    mut lines: mpsc::Receiver<String>,
    shutdown: F,
) -> ControlReply
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut console_open = true;

    loop {
        let command = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                ControlCommand::Exit
            }
            line = lines.recv(), if console_open => match line {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match line.parse::<ControlCommand>() {
                        Ok(command) => command,
                        Err(e) => {
                            println!("{e}");
                            continue;
                        }
                    }
                }
                None => {
                    info!("Console closed, waiting for shutdown signal");
                    console_open = false;
                    continue;
                }
            },
        };

        match control.execute(command).await {
            Ok(ControlReply::Exiting) => {
                println!("{}", ControlReply::Exiting);
                return ControlReply::Exiting;
            }
            Ok(reply) => println!("{reply}"),
            Err(e) => println!("{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RateLimitConfig, RequestLimits, ServerConfig};
    use crate::storage::test_support::scratch_dir;
    use crate::storage::DiskStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn control(label: &str) -> ControlPlane {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            limits: RequestLimits::default(),
            rate_limit: RateLimitConfig::default(),
            root: scratch_dir(label),
            max_connections: 8,
            autostart: false,
            log_level: "info".to_string(),
        };
        let store = Arc::new(DiskStore::new(&config.root));
        ControlPlane::new(&config, store)
    }

    #[tokio::test]
    async fn test_shutdown_while_console_idle() {
        let control = control("console-idle");
        control.execute(ControlCommand::Start).await.unwrap();

        // Sender stays alive: nothing typed, nothing closed.
        let (_tx, rx) = mpsc::channel::<String>(1);
        let reply = tokio::time::timeout(
            Duration::from_secs(2),
            run_console(&control, rx, std::future::ready(())),
        )
        .await
        .expect("console did not finish after shutdown");

        assert_eq!(reply, ControlReply::Exiting);
        assert_eq!(control.local_addr().await, None);
    }

    #[tokio::test]
    async fn test_exit_command() {
        let control = control("console-exit");
        let (tx, rx) = mpsc::channel(4);
        for line in ["", "bogus", "start", "exit"] {
            tx.send(line.to_string()).await.unwrap();
        }

        let reply = tokio::time::timeout(
            Duration::from_secs(2),
            run_console(&control, rx, std::future::pending()),
        )
        .await
        .unwrap();

        assert_eq!(reply, ControlReply::Exiting);
        assert_eq!(control.local_addr().await, None);
    }

    #[tokio::test]
    async fn test_closed_console_waits_for_shutdown() {
        let control = control("console-closed");
        let (tx, rx) = mpsc::channel(4);
        tx.send("start".to_string()).await.unwrap();
        drop(tx);

        let (signal, signalled) = oneshot::channel::<()>();
        let console = run_console(&control, rx, async {
            let _ = signalled.await;
        });
        tokio::pin!(console);

        // Still running after the line source is gone.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), &mut console)
                .await
                .is_err()
        );
        assert!(control.local_addr().await.is_some());

        signal.send(()).unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), console)
            .await
            .unwrap();
        assert_eq!(reply, ControlReply::Exiting);
        assert_eq!(control.local_addr().await, None);
    }
}
