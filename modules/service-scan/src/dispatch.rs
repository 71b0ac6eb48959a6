use crate::{Invocation, ScanPolicy};
use monitor_core::{MonitorError, ScanHandle};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Runs service scans, at most `max_concurrent` at a time. With dispatch
/// disabled the command is only logged.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    policy: ScanPolicy,
    limit: Arc<Semaphore>,
    dispatch: bool,
}

#[derive(Debug)]
pub struct Submission {
    pub invocation: Invocation,
    /// Present when the scan was actually started.
    pub task: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(policy: ScanPolicy, max_concurrent: usize, dispatch: bool) -> Self {
        Dispatcher { policy, limit: Arc::new(Semaphore::new(max_concurrent.max(1))), dispatch }
    }

    pub fn policy(&self) -> &ScanPolicy {
        &self.policy
    }

    /// Must be called from within a tokio runtime when dispatch is enabled.
    pub fn submit(&self, handle: &ScanHandle) -> Result<Submission, MonitorError> {
        let invocation = self.policy.invocation(handle)?;
        if !self.dispatch {
            info!(address = %handle.address, command = %invocation.command_line(), "scan dispatch disabled; not running");
            return Ok(Submission { invocation, task: None });
        }
        let limit = self.limit.clone();
        let inv = invocation.clone();
        let address = handle.address.clone();
        let task = tokio::spawn(async move {
            let Ok(_permit) = limit.acquire_owned().await else { return };
            info!(address = %address, command = %inv.command_line(), "starting service scan");
            let status = Command::new(&inv.program)
                .args(&inv.args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await;
            match status {
                Ok(s) if s.success() => info!(address = %address, "service scan finished"),
                Ok(s) => warn!(address = %address, status = %s, "service scan exited with failure"),
                Err(e) => warn!(address = %address, error = %e, "failed to start service scan"),
            }
        });
        Ok(Submission { invocation, task: Some(task) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn handle() -> ScanHandle {
        ScanHandle {
            id: Uuid::now_v7(),
            address: "127.0.0.1".into(),
            ports: vec![22],
            output: PathBuf::from("/tmp/127_0_0_1-ServiceScan.xml"),
            requested_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn disabled_dispatch_only_builds() {
        let d = Dispatcher::new(ScanPolicy::default(), 2, false);
        let sub = d.submit(&handle()).unwrap();
        assert!(sub.task.is_none());
        assert_eq!(sub.invocation.program, "nmap");
    }

    #[tokio::test]
    async fn runs_allowed_program() {
        let policy = ScanPolicy {
            program: "true".into(),
            allowed_programs: vec!["true".into()],
            ..Default::default()
        };
        let d = Dispatcher::new(policy, 1, true);
        let sub = d.submit(&handle()).unwrap();
        sub.task.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_request_spawns_nothing() {
        let d = Dispatcher::new(ScanPolicy::default(), 1, true);
        let mut h = handle();
        h.address = "$(reboot)".into();
        assert!(matches!(d.submit(&h), Err(MonitorError::InvalidScanRequest(_))));
    }
}
