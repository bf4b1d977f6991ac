//! Audit trail of protocol events

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use arqsim_core::{FaultFlags, FrameKind, NodeId, SeqNum};
use log::warn;

use crate::scheduler::SimTime;

#[derive(Debug, Clone, PartialEq)]
pub enum AuditEvent {
    /// First time a slot's scripted faults are applied.
    ChannelError { faults: FaultFlags },
    FrameSent {
        seq_num: SeqNum,
        payload: Vec<u8>,
        parity: Option<u8>,
        modified_bit: Option<usize>,
        lost: bool,
        duplicate: u8,
        extra_delay: Duration,
    },
    FrameReceived {
        seq_num: SeqNum,
        payload: Vec<u8>,
        corrupted: bool,
    },
    ReplySent {
        kind: FrameKind,
        seq_num: SeqNum,
        lost: bool,
    },
    ReplyReceived {
        kind: FrameKind,
        seq_num: SeqNum,
        ack_num: u32,
    },
    Timeout { seq_num: SeqNum },
    Terminated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub at: SimTime,
    pub node: NodeId,
    pub event: AuditEvent,
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = self.at.as_secs_f64();
        let node = self.node;
        match &self.event {
            AuditEvent::ChannelError { faults } => write!(
                f,
                "At : {at:.2}, Node : {node}, Introducing channel error with code = {faults}"
            ),
            AuditEvent::FrameSent {
                seq_num,
                payload,
                parity,
                modified_bit,
                lost,
                duplicate,
                extra_delay,
            } => {
                let trailer = parity.map(|p| format!("{p:08b}")).unwrap_or_else(|| "-".into());
                let modified = modified_bit.map(|b| b as i64).unwrap_or(-1);
                write!(
                    f,
                    "At : {at:.2}, Node : {node}, [sent] frame with seq_num : {seq_num} and payload = {} and trailer = {trailer}, Modified = {modified}, Lost = {}, Duplicate = {duplicate}, Delay = {:.2}",
                    String::from_utf8_lossy(payload),
                    yes_no(*lost),
                    extra_delay.as_secs_f64(),
                )
            }
            AuditEvent::FrameReceived {
                seq_num,
                payload,
                corrupted,
            } => write!(
                f,
                "At : {at:.2}, Node : {node}, [received] frame with seq_num : {seq_num}, payload = {}, parity error = {}",
                String::from_utf8_lossy(payload),
                yes_no(*corrupted),
            ),
            AuditEvent::ReplySent {
                kind,
                seq_num,
                lost,
            } => write!(
                f,
                "At : {at:.2}, Node : {node}, Sending {kind} with number : {seq_num}, loss : {}",
                yes_no(*lost)
            ),
            AuditEvent::ReplyReceived {
                kind,
                seq_num,
                ack_num,
            } => write!(
                f,
                "At : {at:.2}, Node : {node}, [received] {kind} for seq_num : {seq_num} (slot {ack_num})"
            ),
            AuditEvent::Timeout { seq_num } => write!(
                f,
                "At : {at:.2}, Node : {node}, Time out event for frame with seq_num = {seq_num}"
            ),
            AuditEvent::Terminated => write!(
                f,
                "At : {at:.2}, Node : {node}, All frames acknowledged, terminating"
            ),
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

/// Receives one record per significant protocol event.
pub trait AuditSink {
    fn record(&mut self, record: AuditRecord);
}

impl<S: AuditSink + ?Sized> AuditSink for &mut S {
    fn record(&mut self, record: AuditRecord) {
        (**self).record(record)
    }
}

impl<S: AuditSink + ?Sized> AuditSink for Box<S> {
    fn record(&mut self, record: AuditRecord) {
        (**self).record(record)
    }
}

/// Run-scoped text log, truncated when opened.
pub struct FileAuditLog {
    path: PathBuf,
    writer: LineWriter<File>,
    failed: bool,
}

impl FileAuditLog {
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            writer: LineWriter::new(file),
            failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditLog {
    fn record(&mut self, record: AuditRecord) {
        if let Err(e) = writeln!(self.writer, "{record}") {
            // only report the first failure; the run itself goes on
            if !self.failed {
                warn!("Failed to append to audit log {}: {}", self.path.display(), e);
                self.failed = true;
            }
        }
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    records: Vec<AuditRecord>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    pub fn events_of(&self, node: NodeId) -> impl Iterator<Item = &AuditEvent> {
        self.records
            .iter()
            .filter(move |r| r.node == node)
            .map(|r| &r.event)
    }

    pub fn count(&self, mut predicate: impl FnMut(&AuditEvent) -> bool) -> usize {
        self.records.iter().filter(|r| predicate(&r.event)).count()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&mut self, record: AuditRecord) {
        self.records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sent_line_formatting() {
        let record = AuditRecord {
            at: Duration::from_millis(1500),
            node: 0,
            event: AuditEvent::FrameSent {
                seq_num: 2,
                payload: b"$hi$".to_vec(),
                parity: Some(0b0000_0001),
                modified_bit: Some(13),
                lost: true,
                duplicate: 0,
                extra_delay: Duration::ZERO,
            },
        };
        let line = record.to_string();
        assert!(line.starts_with("At : 1.50, Node : 0, [sent] frame with seq_num : 2"));
        assert!(line.contains("trailer = 00000001"));
        assert!(line.contains("Modified = 13"));
        assert!(line.contains("Lost = YES"));
    }

    #[test]
    fn test_memory_audit_filters() {
        let mut audit = MemoryAudit::new();
        audit.record(AuditRecord {
            at: Duration::ZERO,
            node: 0,
            event: AuditEvent::Timeout { seq_num: 1 },
        });
        audit.record(AuditRecord {
            at: Duration::ZERO,
            node: 1,
            event: AuditEvent::Terminated,
        });
        assert_eq!(audit.events_of(1).count(), 1);
        assert_eq!(audit.count(|e| matches!(e, AuditEvent::Timeout { .. })), 1);
    }

    #[test]
    fn test_file_audit_truncates_and_appends() {
        let path = std::env::temp_dir().join(format!("arqsim-audit-{}.txt", std::process::id()));
        std::fs::write(&path, "stale contents\n").unwrap();

        {
            let mut log = FileAuditLog::create(&path).unwrap();
            log.record(AuditRecord {
                at: Duration::from_secs(2),
                node: 1,
                event: AuditEvent::ReplySent {
                    kind: FrameKind::Nack,
                    seq_num: 3,
                    lost: false,
                },
            });
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(!contents.contains("stale"));
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("Sending NACK with number : 3, loss : NO"));
    }
}
