//! JSON-lines request traces for driving a [`MemSystem`] without a pipeline.
//!
//! ```text
//! {"kind":"request","inum":1,"op":"store","size_code":2,"addr":2147487744,"client":"data","wdata":170}
//! {"kind":"complete","inum":1,"commit":true}
//! {"kind":"tick","cycles":1000}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use crate::error::SimError;
use crate::req::{Client, MemOp, MemResponse, RawRequest};
use crate::system::MemSystem;
use crate::tohost::HostStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceStep {
    Request {
        inum: u64,
        op: MemOp,
        size_code: u8,
        addr: u64,
        client: Client,
        #[serde(default)]
        wdata: u64,
    },
    Complete {
        inum: u64,
        commit: bool,
    },
    Tick {
        cycles: u64,
    },
}

pub fn parse_trace(text: &str) -> Result<Vec<TraceStep>, SimError> {
    let mut steps = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let step = serde_json::from_str(line).map_err(|e| SimError::Trace {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        steps.push(step);
    }
    Ok(steps)
}

#[derive(Debug, Default)]
pub struct ReplayOutcome {
    /// One response per request step, in order.
    pub responses: Vec<MemResponse>,
    pub status: Option<HostStatus>,
    pub ticks: u64,
}

/// Feeds `steps` through the façade. Stops early once a `tohost` verdict is
/// latched.
pub fn replay(sys: &mut MemSystem, steps: &[TraceStep]) -> Result<ReplayOutcome, SimError> {
    let mut outcome = ReplayOutcome::default();

    for step in steps {
        match *step {
            TraceStep::Request {
                inum,
                op,
                size_code,
                addr,
                client,
                wdata,
            } => {
                let raw = RawRequest::new(inum, op.code(), size_code, addr, client.code(), wdata);
                let rsp = sys.request(&raw)?;
                log::info!(
                    "[TRACE] I_{inum} {} {addr:#010x} -> {:?} {:#x}",
                    op.name(),
                    rsp.status,
                    rsp.data
                );
                outcome.responses.push(rsp);
            }
            TraceStep::Complete { inum, commit } => sys.store_complete(inum, commit)?,
            TraceStep::Tick { cycles } => {
                for _ in 0..cycles {
                    sys.tick(outcome.ticks);
                    if sys.uart_irq() {
                        log::debug!("[TRACE] uart interrupt at tick {}", outcome.ticks);
                    }
                    outcome.ticks += 1;
                }
            }
        }

        if let Some(status) = sys.halt() {
            outcome.status = Some(status);
            break;
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::req::RspStatus;
    use crate::uart::NoInput;

    #[test]
    fn test_parse_steps() {
        let text = r#"
# warm-up
{"kind":"request","inum":1,"op":"amo_add","size_code":2,"addr":2147483648,"client":"data","wdata":3}
{"kind":"complete","inum":1,"commit":false}
{"kind":"tick","cycles":5}
"#;
        let steps = parse_trace(text).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps[0],
            TraceStep::Request {
                inum: 1,
                op: MemOp::AmoAdd,
                size_code: 2,
                addr: 0x8000_0000,
                client: Client::Data,
                wdata: 3
            }
        );
        assert_eq!(steps[2], TraceStep::Tick { cycles: 5 });
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = parse_trace("\n{\"kind\":\"nope\"}\n").unwrap_err();
        assert!(matches!(err, SimError::Trace { line: 2, .. }));
    }

    #[test]
    fn test_replay_stops_on_tohost() {
        let config = SimConfig {
            mem_size: 0x1000,
            ..SimConfig::default()
        };
        let mut sys = MemSystem::new(config, Box::new(NoInput), Box::new(std::io::sink())).unwrap();
        let tohost = 0x6FFF_0010;
        let steps = vec![
            TraceStep::Request {
                inum: 1,
                op: MemOp::Store,
                size_code: 2,
                addr: tohost,
                client: Client::Data,
                wdata: 1,
            },
            TraceStep::Tick { cycles: 3 },
            TraceStep::Request {
                inum: 1,
                op: MemOp::Store,
                size_code: 2,
                addr: tohost,
                client: Client::MmioRetired,
                wdata: 1,
            },
            TraceStep::Tick { cycles: 3 },
        ];
        let outcome = replay(&mut sys, &steps).unwrap();
        assert_eq!(outcome.status, Some(HostStatus::Pass));
        assert_eq!(outcome.ticks, 3);
        let statuses: Vec<RspStatus> = outcome.responses.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![RspStatus::Deferred, RspStatus::Ok]);
    }
}
