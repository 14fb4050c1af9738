//! Intermediate data: routing map output into reduce partitions, and
//! merging a partition's files back into sorted, grouped reduce output.
//!
//! Every file is written under a temporary name in the working directory
//! and renamed into place when complete, so readers never see a partial
//! file and re-running a job simply replaces its earlier output.
//!
//! A reduce job removes its intermediate files only after the coordinator
//! accepted its report. A job that is still outstanding therefore always
//! finds every input it had on an earlier attempt. A map job that lost its
//! assignment can still finish late and leave a file behind after the
//! partition was reduced; that partition is retired by then and is never
//! read again in this run, so the working directory must not be reused for
//! another run.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::hash::Hasher;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use fnv::FnvHasher;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::mr::app::{KeyValue, ReduceFn};
use crate::mr::error::Result;
use crate::mr::job::JobId;

pub const INTERMEDIATE_PREFIX: &str = "mr-int-";
pub const OUTPUT_PREFIX: &str = "mr-out-";
const TEMP_PREFIX: &str = ".mr-tmp-";

/// Hashes an intermediate key. `ihash(key) % n_reduce` picks the partition.
pub fn ihash(key: &str) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(key.as_bytes());
    (hasher.finish() & 0x7fff_ffff) as u32
}

pub fn partition_for(key: &str, n_reduce: u32) -> u32 {
    ihash(key) % n_reduce
}

/// Prefix shared by every intermediate file of `partition`. The trailing
/// separator keeps partition 1 from matching partition 10's files.
pub fn intermediate_prefix(partition: u32) -> String {
    format!("{}{}-", INTERMEDIATE_PREFIX, partition)
}

pub fn intermediate_name(partition: u32, job_id: JobId) -> String {
    format!("{}{}", intermediate_prefix(partition), job_id)
}

pub fn output_name(partition: u32) -> String {
    format!("{}{}", OUTPUT_PREFIX, partition)
}

fn temp_file(dir: &Path) -> std::io::Result<NamedTempFile> {
    tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir)
}

/// Buffers one map job's output, one temporary file per partition touched.
pub struct PartitionWriter<'a> {
    dir: &'a Path,
    job_id: JobId,
    n_reduce: u32,
    sinks: BTreeMap<u32, BufWriter<NamedTempFile>>,
    dropped: usize,
}

impl<'a> PartitionWriter<'a> {
    pub fn new(dir: &'a Path, job_id: JobId, n_reduce: u32) -> Self {
        PartitionWriter {
            dir,
            job_id,
            n_reduce,
            sinks: BTreeMap::new(),
            dropped: 0,
        }
    }

    /// Appends a pair to its partition's file. A pair that cannot be
    /// written is logged and dropped.
    pub fn write(&mut self, kv: &KeyValue) {
        let partition = partition_for(&kv.key, self.n_reduce);
        let sink = match self.sinks.entry(partition) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match temp_file(self.dir) {
                Ok(file) => entry.insert(BufWriter::new(file)),
                Err(err) => {
                    warn!(partition, %err, "cannot create intermediate file");
                    self.dropped += 1;
                    return;
                }
            },
        };
        if let Err(err) = append_record(sink, kv) {
            warn!(partition, %err, "cannot write intermediate record");
            self.dropped += 1;
        }
    }

    /// Moves every partition file to its final name and returns the paths
    /// that made it.
    pub fn finish(self) -> Vec<PathBuf> {
        if self.dropped > 0 {
            warn!(job_id = self.job_id, dropped = self.dropped, "records dropped");
        }
        let mut written = vec![];
        for (partition, sink) in self.sinks {
            let target = self.dir.join(intermediate_name(partition, self.job_id));
            match persist(sink, &target) {
                Ok(()) => written.push(target),
                Err(err) => warn!(
                    partition,
                    job_id = self.job_id,
                    %err,
                    "cannot finalize intermediate file"
                ),
            }
        }
        written
    }
}

fn append_record<W: Write>(sink: &mut W, kv: &KeyValue) -> Result<()> {
    serde_json::to_writer(&mut *sink, kv)?;
    sink.write_all(b"\n")?;
    Ok(())
}

fn persist(sink: BufWriter<NamedTempFile>, target: &Path) -> std::io::Result<()> {
    let file = sink.into_inner().map_err(|err| err.into_error())?;
    file.as_file().sync_all()?;
    file.persist(target)?;
    Ok(())
}

/// Intermediate files currently present for `partition`, in name order.
pub fn intermediate_files(dir: &Path, partition: u32) -> Result<Vec<PathBuf>> {
    let prefix = intermediate_prefix(partition);
    let mut files = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Parses one intermediate file. Malformed lines are skipped.
pub fn read_intermediate(path: &Path) -> Result<Vec<KeyValue>> {
    let file = fs::File::open(path)?;
    let mut kvs = vec![];
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<KeyValue>(&line) {
            Ok(kv) => kvs.push(kv),
            Err(err) => warn!(path = %path.display(), %err, "skipping malformed record"),
        }
    }
    Ok(kvs)
}

/// Sorts `intermediate` by key, calls `reducef` once per distinct key and
/// writes one `key value` line per key to `out`.
pub fn write_reduced<W: Write>(
    out: &mut W,
    mut intermediate: Vec<KeyValue>,
    reducef: ReduceFn,
) -> std::io::Result<usize> {
    // stable: values of one key stay in read order
    intermediate.sort_by(|a, b| a.key.cmp(&b.key));

    let mut keys = 0;
    let mut i = 0;
    let len = intermediate.len();
    while i < len {
        let mut j = i + 1;
        while j < len && intermediate[j].key == intermediate[i].key {
            j += 1;
        }
        let values: Vec<String> = intermediate[i..j]
            .iter()
            .map(|kv| kv.value.clone())
            .collect();
        let result = reducef(&intermediate[i].key, &values);
        writeln!(out, "{} {}", intermediate[i].key, result)?;
        keys += 1;
        i = j;
    }
    Ok(keys)
}

/// Result of reducing one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduced {
    pub output: PathBuf,
    /// Intermediate files that went into `output`.
    pub inputs: Vec<PathBuf>,
}

/// Runs the reduce side for one partition. The output is always rewritten
/// from the intermediate files present now, so an empty partition yields an
/// empty output.
///
/// The inputs are left in place; see [`remove_intermediates`].
pub fn reduce_partition(dir: &Path, partition: u32, reducef: ReduceFn) -> Result<Reduced> {
    let target = dir.join(output_name(partition));
    let inputs = intermediate_files(dir, partition)?;

    let mut intermediate = vec![];
    for path in &inputs {
        match read_intermediate(path) {
            Ok(mut kvs) => intermediate.append(&mut kvs),
            Err(err) => warn!(path = %path.display(), %err, "cannot read intermediate file"),
        }
    }
    debug!(partition, files = inputs.len(), records = intermediate.len(), "reducing");

    let mut out = BufWriter::new(temp_file(dir)?);
    let keys = write_reduced(&mut out, intermediate, reducef)?;
    persist(out, &target)?;
    info!(partition, keys, output = %target.display(), "partition reduced");

    Ok(Reduced {
        output: target,
        inputs,
    })
}

/// Deletes consumed intermediate files. Called only once the coordinator
/// accepted the reduce job, so a re-run of the partition still finds them.
pub fn remove_intermediates(inputs: &[PathBuf]) {
    for path in inputs {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), %err, "cannot remove intermediate file"),
        }
    }
}
