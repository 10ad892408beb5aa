// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Which manager group each host was assigned to, so that a host keeps landing on the same
//! target nodes across attach calls.

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    sync::{Mutex, PoisonError},
};

use {
    chrono::{Local, NaiveDateTime},
    log::{debug, warn},
};

use crate::error::{Error, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%f";

#[derive(Debug, Default)]
pub struct AffinityStore {
    groups: Mutex<HashMap<String, usize>>,
    /// Append-only record of assignments. `None` keeps the affinity in memory only.
    file: Option<Mutex<File>>,
}

impl AffinityStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (creating if needed) the state file at `path` and replay the records in it.
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| Error::Config(format!("could not open affinity file '{path}': {e}")))?;

        let mut groups = HashMap::new();
        for record in Record::get_all_from_file(&file)? {
            match record.group {
                Some(group) => groups.insert(record.host, group),
                None => groups.remove(&record.host),
            };
        }
        debug!("loaded {} host affinities from {path}", groups.len());

        Ok(Self {
            groups: Mutex::new(groups),
            file: Some(Mutex::new(file)),
        })
    }

    pub fn get(&self, host: &str) -> Option<usize> {
        self.lock().get(host).copied()
    }

    pub fn assign(&self, host: &str, group: usize) {
        self.lock().insert(host.to_string(), group);
        self.write_record(Record::new(host, Some(group)));
    }

    pub fn forget(&self, host: &str) {
        if self.lock().remove(host).is_some() {
            self.write_record(Record::new(host, None));
        }
    }

    /// Number of hosts recorded against each of the first `count` groups.
    pub fn group_loads(&self, count: usize) -> Vec<usize> {
        let mut loads = vec![0; count];
        for group in self.lock().values() {
            if let Some(load) = loads.get_mut(*group) {
                *load += 1;
            }
        }
        loads
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write failures are logged; the in-memory assignment stands regardless.
    fn write_record(&self, record: Record) {
        let Some(file) = &self.file else {
            return;
        };
        let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = file.write_all(&[record.as_string().as_bytes(), b"\n"].concat()) {
            warn!("failed to write affinity record for {}: {e}", record.host);
        }
    }
}

/// One assignment (or removal, when `group` is `None`) in the affinity file.
#[derive(Debug, PartialEq)]
pub struct Record {
    pub timestamp: NaiveDateTime,
    pub host: String,
    pub group: Option<usize>,
}

impl Record {
    pub fn new(host: &str, group: Option<usize>) -> Self {
        Self {
            timestamp: Local::now().naive_local(),
            host: host.to_string(),
            group,
        }
    }

    /// All records in `file`, sorted by timestamp in ascending order.
    pub fn get_all_from_file(file: &File) -> Result<Vec<Record>> {
        let mut records = BufReader::new(file)
            .lines()
            .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
            .map(|line| {
                let line = line
                    .map_err(|e| Error::Config(format!("unable to read affinity file: {e}")))?;
                Record::from_string(&line)
            })
            .collect::<Result<Vec<Record>>>()?;
        records.sort_by_key(|record| record.timestamp);
        Ok(records)
    }

    pub fn as_string(&self) -> String {
        format!(
            "{}\t{}\t{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.host,
            match self.group {
                Some(group) => group.to_string(),
                None => "-".to_string(),
            }
        )
    }

    pub fn from_string(record: &str) -> Result<Self> {
        let bad = |what: &str| Error::Config(format!("bad affinity record '{record}': {what}"));

        let mut fields = record.split('\t');
        let timestamp = fields.next().ok_or_else(|| bad("missing timestamp"))?;
        let host = fields.next().ok_or_else(|| bad("missing host"))?;
        let group = fields.next().ok_or_else(|| bad("missing group"))?;

        let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| bad(&e.to_string()))?;
        let group = match group {
            "-" => None,
            g => Some(g.parse().map_err(|_| bad("group is not an index"))?),
        };

        Ok(Self {
            timestamp,
            host: host.to_string(),
            group,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_strings() {
        let record = Record::from_string("2025-03-01T10:00:00.000000001\thost-a\t2").unwrap();
        assert_eq!(record.host, "host-a");
        assert_eq!(record.group, Some(2));
        assert_eq!(
            record.as_string(),
            "2025-03-01T10:00:00.000000001\thost-a\t2"
        );

        let removal = Record::from_string("2025-03-01T10:00:00.000000001\thost-a\t-").unwrap();
        assert_eq!(removal.group, None);

        assert!(Record::from_string("2025-03-01T10:00:00.000000001\thost-a").is_err());
        assert!(Record::from_string("yesterday\thost-a\t1").is_err());
        assert!(Record::from_string("2025-03-01T10:00:00.000000001\thost-a\tfirst").is_err());
    }

    #[test]
    fn loads() {
        let store = AffinityStore::in_memory();
        store.assign("a", 0);
        store.assign("b", 1);
        store.assign("c", 1);
        // Out of range groups are ignored, e.g. after the configuration shrank.
        store.assign("d", 5);
        assert_eq!(store.group_loads(3), vec![1, 2, 0]);

        store.forget("b");
        assert_eq!(store.get("b"), None);
        assert_eq!(store.group_loads(3), vec![1, 1, 0]);
    }
}
