use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::mr::error::Error;
use crate::mr::rpc;

/// Map jobs are numbered by input index, reduce jobs by partition.
pub type JobId = u32;

/// Stamp handed out with every assignment. Strictly increasing over a run.
pub type Lease = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Map,
    Reduce,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Map => f.write_str("map"),
            Phase::Reduce => f.write_str("reduce"),
        }
    }
}

impl From<Phase> for rpc::JobPhase {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Map => rpc::JobPhase::Map,
            Phase::Reduce => rpc::JobPhase::Reduce,
        }
    }
}

/// Identity of a job. Ids are only unique within a phase, so the phase is
/// part of the key: a late map report can never retire a reduce job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub phase: Phase,
    pub id: JobId,
}

impl JobKey {
    pub fn map(id: JobId) -> Self {
        JobKey {
            phase: Phase::Map,
            id,
        }
    }

    pub fn reduce(partition: u32) -> Self {
        JobKey {
            phase: Phase::Reduce,
            id: partition,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.phase, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Input name and raw content, read once when the coordinator starts.
    Map { name: String, data: Arc<[u8]> },
    Reduce { partition: u32 },
}

/// Coordinator-side record of one schedulable job.
#[derive(Debug, Clone)]
pub struct JobRecord {
    id: JobId,
    payload: Payload,
    assigned: bool,
    assigned_at: Option<Instant>,
    lease: Option<Lease>,
}

impl JobRecord {
    pub fn map(id: JobId, name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self::unassigned(
            id,
            Payload::Map {
                name: name.into(),
                data: data.into(),
            },
        )
    }

    pub fn reduce(partition: u32) -> Self {
        Self::unassigned(partition, Payload::Reduce { partition })
    }

    fn unassigned(id: JobId, payload: Payload) -> Self {
        JobRecord {
            id,
            payload,
            assigned: false,
            assigned_at: None,
            lease: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        match self.payload {
            Payload::Map { .. } => Phase::Map,
            Payload::Reduce { .. } => Phase::Reduce,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            phase: self.phase(),
            id: self.id,
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned
    }

    pub fn assigned_at(&self) -> Option<Instant> {
        self.assigned_at
    }

    /// Lease of the most recent assignment, kept after a timeout reset so a
    /// slow but finished worker can still retire the job.
    pub fn lease(&self) -> Option<Lease> {
        self.lease
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        match self.assigned_at {
            Some(at) if self.assigned => now.saturating_duration_since(at) > timeout,
            _ => false,
        }
    }

    /// Unassigned, or assigned so long ago that the worker is presumed gone.
    pub fn is_eligible(&self, now: Instant, timeout: Duration) -> bool {
        !self.assigned || self.is_expired(now, timeout)
    }

    pub fn assign(&mut self, now: Instant, lease: Lease) {
        self.assigned = true;
        self.assigned_at = Some(now);
        self.lease = Some(lease);
    }

    pub fn release(&mut self) {
        self.assigned = false;
        self.assigned_at = None;
    }
}

impl fmt::Display for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ job: {}", self.key())?;
        if let Payload::Map { name, data } = &self.payload {
            write!(f, ", input: {} ({} bytes)", name, data.len())?;
        }
        write!(f, ", assigned: {}", self.assigned)?;
        if let Some(lease) = self.lease {
            write!(f, ", lease: {}", lease)?;
        }
        f.write_str(" }")
    }
}

impl From<JobRecord> for rpc::Job {
    fn from(job: JobRecord) -> Self {
        let phase = rpc::JobPhase::from(job.phase()) as i32;
        let lease = job.lease.unwrap_or_default();
        match job.payload {
            Payload::Map { name, data } => rpc::Job {
                id: job.id,
                phase,
                name,
                data: data.to_vec(),
                lease,
            },
            Payload::Reduce { partition } => rpc::Job {
                id: partition,
                phase,
                name: String::new(),
                data: Vec::new(),
                lease,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapTask {
    pub id: JobId,
    pub name: String,
    pub data: Vec<u8>,
    pub lease: Lease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceTask {
    pub partition: u32,
    pub lease: Lease,
}

/// What a worker got back from asking for work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Map(MapTask),
    Reduce(ReduceTask),
    NoJob,
}

impl TryFrom<rpc::Job> for Assignment {
    type Error = Error;

    fn try_from(job: rpc::Job) -> Result<Self, Self::Error> {
        match rpc::JobPhase::from_i32(job.phase) {
            Some(rpc::JobPhase::Map) => Ok(Assignment::Map(MapTask {
                id: job.id,
                name: job.name,
                data: job.data,
                lease: job.lease,
            })),
            Some(rpc::JobPhase::Reduce) => Ok(Assignment::Reduce(ReduceTask {
                partition: job.id,
                lease: job.lease,
            })),
            Some(rpc::JobPhase::NoJob) => Ok(Assignment::NoJob),
            None => Err(Error::UnknownPhase(job.phase)),
        }
    }
}

/// Completion report sent once a job's output is in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub key: JobKey,
    pub lease: Lease,
}

impl From<&MapTask> for Report {
    fn from(task: &MapTask) -> Self {
        Report {
            key: JobKey::map(task.id),
            lease: task.lease,
        }
    }
}

impl From<&ReduceTask> for Report {
    fn from(task: &ReduceTask) -> Self {
        Report {
            key: JobKey::reduce(task.partition),
            lease: task.lease,
        }
    }
}

impl From<Report> for rpc::Job {
    fn from(report: Report) -> Self {
        rpc::Job {
            id: report.key.id,
            phase: rpc::JobPhase::from(report.key.phase) as i32,
            lease: report.lease,
            ..Default::default()
        }
    }
}

impl TryFrom<rpc::Job> for Report {
    type Error = Error;

    fn try_from(job: rpc::Job) -> Result<Self, Self::Error> {
        let phase = match rpc::JobPhase::from_i32(job.phase) {
            Some(rpc::JobPhase::Map) => Phase::Map,
            Some(rpc::JobPhase::Reduce) => Phase::Reduce,
            _ => return Err(Error::UnknownPhase(job.phase)),
        };
        Ok(Report {
            key: JobKey { phase, id: job.id },
            lease: job.lease,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fresh_record_is_eligible() {
        let job = JobRecord::map(3, "pg-1.txt", b"a b".to_vec());
        let now = Instant::now();
        assert!(!job.is_assigned());
        assert!(job.assigned_at().is_none());
        assert!(job.is_eligible(now, Duration::from_secs(10)));
        assert_eq!(job.key(), JobKey::map(3));
    }

    #[test]
    fn test_assignment_expires_after_timeout() {
        let timeout = Duration::from_secs(10);
        let start = Instant::now();
        let mut job = JobRecord::reduce(1);
        job.assign(start, 7);

        assert!(job.is_assigned());
        assert_eq!(job.assigned_at(), Some(start));
        assert!(!job.is_eligible(start + timeout, timeout));
        assert!(job.is_eligible(start + timeout + Duration::from_millis(1), timeout));

        job.release();
        assert!(!job.is_assigned());
        assert!(job.assigned_at().is_none());
        assert_eq!(job.lease(), Some(7));
    }

    #[test]
    fn test_map_record_travels_as_map_assignment() {
        let mut job = JobRecord::map(0, "in.txt", b"hello".to_vec());
        job.assign(Instant::now(), 4);

        let wire = rpc::Job::from(job);
        let assignment = Assignment::try_from(wire).unwrap();
        assert_eq!(
            assignment,
            Assignment::Map(MapTask {
                id: 0,
                name: "in.txt".to_string(),
                data: b"hello".to_vec(),
                lease: 4,
            })
        );
    }

    #[test]
    fn test_default_wire_job_means_no_job() {
        let assignment = Assignment::try_from(rpc::Job::default()).unwrap();
        assert_eq!(assignment, Assignment::NoJob);
    }

    #[test]
    fn test_unknown_phase_is_rejected() {
        let wire = rpc::Job {
            phase: 42,
            ..Default::default()
        };
        assert!(matches!(
            Assignment::try_from(wire),
            Err(Error::UnknownPhase(42))
        ));
    }

    #[test]
    fn test_report_keeps_phase_and_lease() {
        let task = ReduceTask {
            partition: 5,
            lease: 11,
        };
        let report = Report::from(&task);
        let wire = rpc::Job::from(report);
        assert!(wire.data.is_empty());
        assert_eq!(Report::try_from(wire).unwrap(), report);
        assert_eq!(report.key, JobKey::reduce(5));
    }
}
