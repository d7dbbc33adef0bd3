//! JSON file backend.
//!
//! Layout under the data directory, for node type `finance/sales_order`:
//!
//! ```text
//! finance/sales_order/
//!     17.json                # snapshot log of node 17
//!     18.json
//!     sales_order.counter    # {"current": 18}
//! ```
//!
//! A log file is a JSON array of snapshot objects in append order:
//!
//! ```json
//! [{"data": {...}, "_schema_version": 1, "created_at": "...",
//!   "updated_at": "...", "data_version": 1, "owner_id": "importer"}]
//! ```
//!
//! Files written by older tools may hold a single snapshot object instead of
//! an array, or the bare payload without the `data` wrapper. Both are read;
//! the next write converts the file to the array form.
//!
//! Every file is replaced atomically: written to a hidden temporary file in
//! the same directory, synced, then renamed over the original.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::databases::{RecordBackend, SlotWrite};
use crate::errors::{NodeStoreError, NodeStoreResult};
use crate::keys::{NodeId, NodeType, RecordKey};
use crate::record::{RecordSnapshot, SCHEMA_VERSION_FIELD};
use crate::utils::{KeyedLocks, parse_datetime};
use crate::value::{payload_from_json, payload_to_json};

const LOG_EXTENSION: &str = "json";
const COUNTER_EXTENSION: &str = "counter";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CounterFile {
    current: u64,
}

/// Snapshot logs and counters as plain files.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    use_fsync: bool,
    log_locks: KeyedLocks<RecordKey>,
    counter_locks: KeyedLocks<NodeType>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P, use_fsync: bool) -> NodeStoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| NodeStoreError::io(format!("creating {}", root.display()), e))?;
        Ok(Self {
            root,
            use_fsync,
            log_locks: KeyedLocks::new(),
            counter_locks: KeyedLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, node_type: &NodeType) -> PathBuf {
        node_type
            .segments()
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Path of a node's log file.
    pub fn log_path(&self, key: &RecordKey) -> PathBuf {
        self.type_dir(&key.node_type)
            .join(format!("{}.{LOG_EXTENSION}", key.id))
    }

    /// Path of a node type's counter file.
    pub fn counter_path(&self, node_type: &NodeType) -> PathBuf {
        self.type_dir(node_type)
            .join(format!("{}.{COUNTER_EXTENSION}", node_type.leaf()))
    }

    fn read_counter(&self, node_type: &NodeType) -> NodeStoreResult<u64> {
        let path = self.counter_path(node_type);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(NodeStoreError::io(format!("reading {}", path.display()), e)),
        };
        serde_json::from_str::<CounterFile>(&text)
            .map(|counter| counter.current)
            .map_err(|e| NodeStoreError::CounterCorrupt {
                node_type: node_type.to_string(),
                reason: e.to_string(),
            })
    }

    /// Write `bytes` to `path` via a temporary sibling and a rename.
    fn replace_file(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = dir.join(format!(".{file_name}.tmp"));

        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        if self.use_fsync {
            file.sync_all()?;
        }
        drop(file);
        fs::rename(&tmp, path)?;

        if self.use_fsync {
            // persist the rename itself; not every platform can open a directory
            if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
                debug!("Directory sync of {} skipped: {e}", dir.display());
            }
        }
        Ok(())
    }

    fn parse_log(&self, key: &RecordKey, text: &str) -> NodeStoreResult<Vec<RecordSnapshot>> {
        let corrupt = |reason: String| NodeStoreError::CorruptRecord {
            node_type: key.node_type.to_string(),
            id: key.id.to_string(),
            reason,
        };
        let json: Value = serde_json::from_str(text).map_err(|e| corrupt(e.to_string()))?;
        match json {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| snapshot_from_json(item, index).map_err(&corrupt))
                .collect(),
            object @ Value::Object(_) => Ok(vec![snapshot_from_json(object, 0).map_err(corrupt)?]),
            _ => Err(corrupt("expected a snapshot object or an array of them".into())),
        }
    }
}

impl RecordBackend for FileStore {
    fn read_log(&self, key: &RecordKey) -> NodeStoreResult<Vec<RecordSnapshot>> {
        let path = self.log_path(key);
        match fs::read_to_string(&path) {
            Ok(text) => self.parse_log(key, &text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(NodeStoreError::io(format!("reading {}", path.display()), e)),
        }
    }

    fn write_snapshot(
        &self,
        key: &RecordKey,
        snapshot: &RecordSnapshot,
    ) -> NodeStoreResult<SlotWrite> {
        self.log_locks.with(key, || {
            let mut log = self.read_log(key)?;
            let next = log.len() as u64 + 1;
            if snapshot.sequence_number < next {
                return Ok(SlotWrite::Occupied);
            }
            if snapshot.sequence_number > next {
                return Err(NodeStoreError::ConcurrentModification {
                    node_type: key.node_type.to_string(),
                    id: key.id.to_string(),
                    expected: snapshot.sequence_number - 1,
                    found: log.len() as u64,
                });
            }
            log.push(snapshot.clone());

            let document = Value::Array(log.iter().map(snapshot_to_json).collect());
            let bytes = serde_json::to_vec_pretty(&document)
                .map_err(crate::errors::EncodingDecodingError::from)?;
            let path = self.log_path(key);
            self.replace_file(&path, &bytes)
                .map_err(|e| NodeStoreError::io(format!("writing {}", path.display()), e))?;
            Ok(SlotWrite::Written)
        })
    }

    fn list_ids(&self, node_type: &NodeType) -> NodeStoreResult<Vec<NodeId>> {
        let dir = self.type_dir(node_type);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(NodeStoreError::io(format!("listing {}", dir.display()), e)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| NodeStoreError::io(format!("listing {}", dir.display()), e))?;
            let path = entry.path();
            if let Some(stem) = log_stem(&path) {
                ids.push(NodeId::from(stem));
            }
        }
        Ok(ids)
    }

    fn list_node_types(&self) -> NodeStoreResult<Vec<NodeType>> {
        let mut found = Vec::new();
        walk_types(&self.root, &mut Vec::new(), &mut found)?;
        found.sort();
        Ok(found)
    }

    fn increment_counter(&self, node_type: &NodeType) -> NodeStoreResult<u64> {
        self.counter_locks.with(node_type, || {
            let next = self.read_counter(node_type)? + 1;
            let bytes = serde_json::to_vec(&CounterFile { current: next }).map_err(|e| {
                NodeStoreError::CounterWriteFailed {
                    node_type: node_type.to_string(),
                    reason: e.to_string(),
                }
            })?;
            self.replace_file(&self.counter_path(node_type), &bytes)
                .map_err(|e| NodeStoreError::CounterWriteFailed {
                    node_type: node_type.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(next)
        })
    }

    fn current_counter(&self, node_type: &NodeType) -> NodeStoreResult<u64> {
        self.read_counter(node_type)
    }
}

/// Stem of a visible `*.json` file.
fn log_stem(path: &Path) -> Option<&str> {
    if !path.is_file() || path.extension().is_none_or(|ext| ext != LOG_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    (!stem.starts_with('.')).then_some(stem)
}

fn walk_types(
    dir: &Path,
    segments: &mut Vec<String>,
    found: &mut Vec<NodeType>,
) -> NodeStoreResult<()> {
    let entries =
        fs::read_dir(dir).map_err(|e| NodeStoreError::io(format!("listing {}", dir.display()), e))?;
    let mut has_logs = false;
    for entry in entries {
        let entry = entry.map_err(|e| NodeStoreError::io(format!("listing {}", dir.display()), e))?;
        let path = entry.path();
        if path.is_dir() {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            segments.push(name.to_string());
            walk_types(&path, segments, found)?;
            segments.pop();
        } else if log_stem(&path).is_some() {
            has_logs = true;
        }
    }
    if has_logs && !segments.is_empty() {
        if let Ok(node_type) = NodeType::new(segments.join("/")) {
            found.push(node_type);
        }
    }
    Ok(())
}

fn snapshot_to_json(snapshot: &RecordSnapshot) -> Value {
    let mut out = json!({
        "data": payload_to_json(&snapshot.payload),
        SCHEMA_VERSION_FIELD: snapshot.schema_version,
        "created_at": snapshot.created_at.to_rfc3339(),
        "updated_at": snapshot.updated_at.to_rfc3339(),
        "data_version": snapshot.sequence_number,
    });
    if let (Some(owner), Some(map)) = (&snapshot.owner_id, out.as_object_mut()) {
        map.insert("owner_id".into(), Value::String(owner.clone()));
    }
    out
}

/// Read one snapshot object. The sequence number is the position in the
/// log; stored `data_version` values are not trusted.
fn snapshot_from_json(json: Value, index: usize) -> Result<RecordSnapshot, String> {
    let Value::Object(mut object) = json else {
        return Err(format!("snapshot {} is not an object", index + 1));
    };

    let wrapped = matches!(object.get("data"), Some(Value::Object(_)));
    let (data, meta) = if wrapped {
        let data = object.remove("data").unwrap_or_default();
        (data, object)
    } else {
        (Value::Object(object.clone()), object)
    };
    let payload = payload_from_json(data)
        .ok_or_else(|| format!("snapshot {} has no payload object", index + 1))?;

    let version = [SCHEMA_VERSION_FIELD, "version"]
        .iter()
        .find_map(|field| positive_u32(meta.get(*field)))
        .or_else(|| positive_u32(payload_to_json(&payload).get(SCHEMA_VERSION_FIELD)))
        .unwrap_or(1);

    let created_at = timestamp(&meta, "created_at");
    let updated_at = timestamp(&meta, "updated_at");
    let now = Utc::now();

    Ok(RecordSnapshot {
        payload,
        schema_version: version,
        created_at: created_at.or(updated_at).unwrap_or(now),
        updated_at: updated_at.or(created_at).unwrap_or(now),
        sequence_number: index as u64 + 1,
        owner_id: meta
            .get("owner_id")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn positive_u32(value: Option<&Value>) -> Option<u32> {
    let number = match value? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    u32::try_from(number).ok().filter(|v| *v > 0)
}

fn timestamp(meta: &Map<String, Value>, field: &str) -> Option<DateTime<Utc>> {
    meta.get(field).and_then(Value::as_str).and_then(parse_datetime)
}
