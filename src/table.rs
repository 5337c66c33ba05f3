use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{Result, TableError};
use crate::schema::{Row, Schema};

/// Capacity of the per-table diff broadcast channel. A subscriber that falls
/// this far behind is resynced with a fresh snapshot instead of replaying.
pub const DIFF_CHANNEL_CAPACITY: usize = 1024;

/// The minimal description of one table mutation, used to update subscribers
/// incrementally. Applying a diff means: drop `evicted` rows from the front,
/// then append `appended` at the back.
#[derive(Debug, Clone, Serialize)]
pub struct TableDiff {
    /// Table append sequence number after this mutation
    pub seq: u64,
    /// Rows appended at the back, in order
    pub appended: Vec<Row>,
    /// Number of rows evicted from the front
    pub evicted: usize,
}

/// An immutable copy of a table's rows at a known sequence number
#[derive(Debug, Clone, Serialize)]
pub struct TableSnapshot {
    pub seq: u64,
    pub rows: Vec<Row>,
}

/// A named, schema-typed, capacity-limited row store with FIFO eviction.
///
/// Owned and mutated by the worker loop thread only; other threads observe it
/// through snapshots and the diff broadcast channel.
pub struct BoundedTable {
    name: String,
    schema: Schema,
    capacity: usize,
    rows: VecDeque<Row>,
    seq: u64,
    updates: broadcast::Sender<Arc<TableDiff>>,
}

impl BoundedTable {
    /// Create a new empty table.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` if `capacity` is zero; schema validity is
    /// enforced by `Schema::new` before this point.
    pub fn create(name: impl Into<String>, schema: Schema, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(TableError::InvalidCapacity(capacity));
        }
        let (updates, _) = broadcast::channel(DIFF_CHANNEL_CAPACITY);
        Ok(Self {
            name: name.into(),
            schema,
            capacity,
            rows: VecDeque::with_capacity(capacity),
            seq: 0,
            updates,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sequence number of the last mutation (0 before any append)
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Subscribe to future diffs of this table
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TableDiff>> {
        self.updates.subscribe()
    }

    /// Handle on the diff channel, for registration with a registry
    pub(crate) fn update_sender(&self) -> broadcast::Sender<Arc<TableDiff>> {
        self.updates.clone()
    }

    /// Append rows, evicting oldest rows first so that `len() <= capacity`
    /// always holds. All-or-nothing: every row is validated against the
    /// schema before any mutation.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if any row's shape or types don't match; the
    /// table is left unchanged.
    pub fn append(&mut self, rows: Vec<Row>) -> Result<Arc<TableDiff>> {
        // An empty batch mutates nothing and must not reach subscribers
        if rows.is_empty() {
            return Ok(Arc::new(TableDiff {
                seq: self.seq,
                appended: Vec::new(),
                evicted: 0,
            }));
        }
        for row in &rows {
            self.schema.check_row(&self.name, row)?;
        }

        // When the batch alone exceeds capacity only its tail survives
        let keep_from = rows.len().saturating_sub(self.capacity);
        let appended: Vec<Row> = rows[keep_from..].to_vec();

        let overflow = (self.rows.len() + appended.len()).saturating_sub(self.capacity);
        let evicted = keep_from + overflow;
        for _ in 0..overflow {
            self.rows.pop_front();
        }
        self.rows.extend(appended.iter().cloned());

        self.seq += 1;
        let diff = Arc::new(TableDiff {
            seq: self.seq,
            appended,
            evicted,
        });
        // No receivers is fine; subscribers come and go
        let _ = self.updates.send(diff.clone());
        Ok(diff)
    }

    /// Replace the entire contents with `rows`. Emits a diff evicting every
    /// previous row, so subscribers apply it with the same algorithm as an
    /// append. Used by the producer at cursor wraparound.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` (table unchanged) or `InvalidCapacity` if
    /// `rows` exceeds the table capacity.
    pub fn replace(&mut self, rows: Vec<Row>) -> Result<Arc<TableDiff>> {
        for row in &rows {
            self.schema.check_row(&self.name, row)?;
        }
        if rows.len() > self.capacity {
            return Err(TableError::InvalidCapacity(rows.len()));
        }

        let evicted = self.rows.len();
        self.rows.clear();
        self.rows.extend(rows.iter().cloned());

        self.seq += 1;
        let diff = Arc::new(TableDiff {
            seq: self.seq,
            appended: rows,
            evicted,
        });
        let _ = self.updates.send(diff.clone());
        Ok(diff)
    }

    /// An immutable copy of the current rows, in table order
    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            seq: self.seq,
            rows: self.rows.iter().cloned().collect(),
        }
    }
}

/// The set of tables owned by the worker loop thread. Every mutation goes
/// through this map on that thread; nothing else holds a `BoundedTable`.
#[derive(Default)]
pub struct TableHost {
    tables: std::collections::HashMap<String, BoundedTable>,
}

impl TableHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a table.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` if a table with the same name is already
    /// hosted; the existing table is untouched.
    pub fn insert(&mut self, table: BoundedTable) -> Result<()> {
        let name = table.name().to_string();
        if self.tables.contains_key(&name) {
            return Err(TableError::DuplicateName(name));
        }
        self.tables.insert(name, table);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&BoundedTable> {
        self.tables
            .get(name)
            .ok_or_else(|| TableError::NoSuchTable(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut BoundedTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| TableError::NoSuchTable(name.to_string()))
    }

    pub fn snapshot(&self, name: &str) -> Result<TableSnapshot> {
        Ok(self.get(name)?.snapshot())
    }

    pub fn append(&mut self, name: &str, rows: Vec<Row>) -> Result<Arc<TableDiff>> {
        self.get_mut(name)?.append(rows)
    }

    pub fn replace(&mut self, name: &str, rows: Vec<Row>) -> Result<Arc<TableDiff>> {
        self.get_mut(name)?.replace(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, Value};

    fn test_schema() -> Schema {
        Schema::new(vec![("v".to_string(), ColumnType::Integer)]).unwrap()
    }

    fn int_row(v: i64) -> Row {
        vec![Value::Int(v)]
    }

    fn int_rows(range: std::ops::Range<i64>) -> Vec<Row> {
        range.map(int_row).collect()
    }

    fn row_values(snapshot: &TableSnapshot) -> Vec<i64> {
        snapshot
            .rows
            .iter()
            .map(|r| match r[0] {
                Value::Int(v) => v,
                Value::Float(_) => panic!("unexpected float"),
            })
            .collect()
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(matches!(
            BoundedTable::create("t", test_schema(), 0),
            Err(TableError::InvalidCapacity(0))
        ));
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let mut table = BoundedTable::create("t", test_schema(), 5).unwrap();
        for i in 0..20 {
            table.append(vec![int_row(i)]).unwrap();
            assert!(table.len() <= 5);
        }
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn fifo_eviction_keeps_last_capacity_rows_in_order() {
        let mut table = BoundedTable::create("t", test_schema(), 4).unwrap();
        table.append(int_rows(0..3)).unwrap();
        table.append(int_rows(3..7)).unwrap();
        // Concatenation 0..7, last 4 survive
        assert_eq!(row_values(&table.snapshot()), vec![3, 4, 5, 6]);
    }

    #[test]
    fn oversized_batch_keeps_only_its_tail() {
        let mut table = BoundedTable::create("t", test_schema(), 3).unwrap();
        let diff = table.append(int_rows(0..10)).unwrap();
        assert_eq!(row_values(&table.snapshot()), vec![7, 8, 9]);
        assert_eq!(diff.evicted, 7);
        assert_eq!(diff.appended.len(), 3);
    }

    #[test]
    fn failed_append_leaves_table_unchanged() {
        let mut table = BoundedTable::create("t", test_schema(), 4).unwrap();
        table.append(int_rows(0..3)).unwrap();
        let before = row_values(&table.snapshot());
        let seq_before = table.seq();

        let bad = vec![int_row(3), vec![Value::Float(1.5)]];
        assert!(matches!(
            table.append(bad),
            Err(TableError::SchemaMismatch { .. })
        ));
        assert_eq!(row_values(&table.snapshot()), before);
        assert_eq!(table.seq(), seq_before);
    }

    #[test]
    fn diff_describes_mutation() {
        let mut table = BoundedTable::create("t", test_schema(), 3).unwrap();
        table.append(int_rows(0..3)).unwrap();
        let diff = table.append(vec![int_row(3)]).unwrap();
        assert_eq!(diff.seq, 2);
        assert_eq!(diff.evicted, 1);
        assert_eq!(diff.appended, vec![int_row(3)]);
    }

    #[test]
    fn replace_evicts_everything() {
        let mut table = BoundedTable::create("t", test_schema(), 5).unwrap();
        table.append(int_rows(0..5)).unwrap();
        let diff = table.replace(vec![int_row(99)]).unwrap();
        assert_eq!(diff.evicted, 5);
        assert_eq!(row_values(&table.snapshot()), vec![99]);
    }

    #[test]
    fn empty_append_is_a_no_op() {
        let mut table = BoundedTable::create("t", test_schema(), 3).unwrap();
        table.append(int_rows(0..2)).unwrap();
        let mut rx = table.subscribe();

        let diff = table.append(vec![]).unwrap();
        assert_eq!(diff.seq, 1);
        assert!(diff.appended.is_empty());
        assert_eq!(diff.evicted, 0);

        // seq unchanged, nothing broadcast
        assert_eq!(table.seq(), 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(row_values(&table.snapshot()), vec![0, 1]);
    }

    #[test]
    fn subscribers_receive_diffs_in_order() {
        let mut table = BoundedTable::create("t", test_schema(), 3).unwrap();
        let mut rx = table.subscribe();
        table.append(vec![int_row(1)]).unwrap();
        table.append(vec![int_row(2)]).unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(second.appended, vec![int_row(2)]);
    }
}
