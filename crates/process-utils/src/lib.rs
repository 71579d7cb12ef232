//! Child-process helpers shared across the workspace.
//!
//! Besides the Windows `CREATE_NO_WINDOW` plumbing, this crate owns the one
//! piece of process handling every long-running effect needs: waiting for a
//! child while honouring a cancellation token, and making sure the child is
//! reaped before the caller moves on.

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
pub use self::tokio_impl::*;

#[cfg(feature = "tokio")]
mod tokio_impl {
    use std::ffi::OsStr;
    use std::process::ExitStatus;

    use tokio::process::Child;
    use tokio_util::sync::CancellationToken;
    use tracing::debug;

    use super::NoWindowExt;

    impl NoWindowExt for tokio::process::Command {
        fn no_window(&mut self) {
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                self.as_std_mut().creation_flags(super::CREATE_NO_WINDOW);
            }
        }
    }

    /// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
    ///
    /// The returned command has `kill_on_drop` enabled so a dropped future
    /// never leaves an orphaned child behind.
    pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(program);
        cmd.no_window();
        cmd.kill_on_drop(true);
        cmd
    }

    /// How a supervised child process finished.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ChildExit {
        /// The child exited on its own.
        Exited(ExitStatus),
        /// The token fired first; the child was killed and reaped.
        Killed,
    }

    impl ChildExit {
        /// True when the child exited on its own with a zero status.
        pub fn success(&self) -> bool {
            matches!(self, ChildExit::Exited(status) if status.success())
        }
    }

    /// Wait for `child` to exit, killing it if `token` is cancelled first.
    ///
    /// The child is always reaped before this returns, so callers can rely on
    /// the process no longer touching its output once they get a result.
    pub async fn wait_or_kill(
        child: &mut Child,
        token: &CancellationToken,
    ) -> std::io::Result<ChildExit> {
        tokio::select! {
            status = child.wait() => status.map(ChildExit::Exited),
            _ = token.cancelled() => {
                debug!(pid = ?child.id(), "cancellation requested, killing child");
                // `kill` sends the signal and waits for the process to go away.
                child.kill().await?;
                Ok(ChildExit::Killed)
            }
        }
    }
}

#[cfg(all(test, unix, feature = "tokio"))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_wait_or_kill_returns_exit_status() {
        let mut child = tokio_command("true").spawn().unwrap();
        let token = CancellationToken::new();

        let exit = wait_or_kill(&mut child, &token).await.unwrap();
        assert!(exit.success());
    }

    #[tokio::test]
    async fn test_wait_or_kill_kills_on_cancel() {
        let mut child = tokio_command("sleep").arg("30").spawn().unwrap();
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let exit = wait_or_kill(&mut child, &token).await.unwrap();
        assert_eq!(exit, ChildExit::Killed);
        assert!(!exit.success());
    }
}
