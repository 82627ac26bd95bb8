use crate::engine::ammo::AmmoPick;
use crate::model::ShotRecord;
use crate::runner::{self, words, OutputSink};
use anyhow::{bail, Context, Result};
use std::time::{Duration, Instant};

/// Fires one request per pick through an external request tool (`curl` by default).
#[derive(Debug, Clone)]
pub struct ShotExecutor {
    tool: Vec<String>,
    cooldown: Duration,
}

impl ShotExecutor {
    pub fn new(request_tool: &str, cooldown: Duration) -> Result<Self> {
        let tool = words::split(request_tool)
            .with_context(|| format!("invalid request tool `{request_tool}`"))?;
        if tool.is_empty() {
            bail!("request tool command is empty");
        }
        Ok(Self { tool, cooldown })
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Run `<tool> <target>`, sleep the cooldown, then wait for the tool to
    /// exit before terminating it.
    ///
    /// A tool that exits non-zero is recorded, not raised. Only a failure to
    /// start the tool is an error.
    pub async fn fire(&self, number: usize, pick: AmmoPick) -> Result<ShotRecord> {
        let start = Instant::now();
        let mut argv = self.tool.clone();
        argv.push(pick.target.clone());

        let hit = runner::spawn_argv(&argv, OutputSink::Discard)
            .with_context(|| format!("shot {number} at {} could not be fired", pick.target))?;
        tokio::time::sleep(self.cooldown).await;
        let status = hit.stop(true).await?;

        Ok(ShotRecord {
            number,
            index: pick.index,
            target: pick.target,
            exit_code: status.and_then(|s| s.code()),
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn pick(target: &str) -> AmmoPick {
        AmmoPick {
            index: 0,
            target: target.to_string(),
        }
    }

    #[tokio::test]
    async fn successful_shot_respects_cooldown() {
        let exec = ShotExecutor::new("true", Duration::from_millis(50)).unwrap();
        let record = exec.fire(1, pick("localhost:1/x")).await.unwrap();
        assert!(record.succeeded());
        assert_eq!(record.number, 1);
        assert_eq!(record.target, "localhost:1/x");
        assert!(record.elapsed >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn failing_tool_is_recorded_not_raised() {
        let exec = ShotExecutor::new("false", Duration::ZERO).unwrap();
        let record = exec.fire(3, pick("unreachable")).await.unwrap();
        assert_eq!(record.exit_code, Some(1));
        assert!(!record.succeeded());
    }

    #[tokio::test]
    async fn missing_tool_is_an_error() {
        let exec = ShotExecutor::new("no-such-request-tool-91b2", Duration::ZERO).unwrap();
        let err = exec.fire(1, pick("x")).await.unwrap_err();
        assert!(format!("{err:#}").contains("no-such-request-tool-91b2"));
    }

    #[tokio::test]
    async fn waits_for_slow_tool_past_cooldown() {
        // The target doubles as the sleep duration.
        let exec = ShotExecutor::new("sleep", Duration::from_millis(10)).unwrap();
        let record = exec.fire(1, pick("0.3")).await.unwrap();
        assert!(record.succeeded());
        assert!(record.elapsed >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn target_is_passed_as_one_argument() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("hits");
        let tool = format!(
            "sh -c 'printf \"%s\\n\" \"$0\" >> {}'",
            words::quote(log.to_str().unwrap())
        );
        let exec = ShotExecutor::new(&tool, Duration::ZERO).unwrap();
        exec.fire(1, pick("host:80/a b")).await.unwrap();
        assert_eq!(std::fs::read_to_string(log).unwrap(), "host:80/a b\n");
    }

    #[test]
    fn empty_tool_is_rejected() {
        assert!(ShotExecutor::new("  ", Duration::ZERO).is_err());
    }
}
