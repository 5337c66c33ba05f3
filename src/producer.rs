use tracing::{debug, info};

use crate::error::{Result, TableError};
use crate::registry::TableRegistry;
use crate::source::SourceFrame;
use crate::table::{BoundedTable, TableHost};

/// A producer owns one table on the worker loop: it creates the table at
/// setup and mutates it once per scheduler tick.
pub trait Producer: Send + 'static {
    /// Create and register this producer's table. Runs once on the worker
    /// thread before the first tick; failures are fatal at startup.
    fn setup(&mut self, tables: &mut TableHost, registry: &TableRegistry) -> Result<()>;

    /// Advance one step. Failures are logged by the loop and must leave the
    /// table unchanged.
    fn tick(&mut self, tables: &mut TableHost) -> Result<()>;
}

/// One-indexed position into a finite source sequence. Wraps back to 1 when
/// it would pass the end, making the stream periodic.
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    position: usize,
    len: usize,
}

impl Cursor {
    /// # Errors
    ///
    /// Returns `EmptySource` for a zero-length source.
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(TableError::EmptySource);
        }
        Ok(Self { position: 1, len })
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Reset to the start if the cursor has reached the end of the source.
    /// Returns true when a wrap happened.
    pub fn wrap_if_exhausted(&mut self) -> bool {
        if self.position >= self.len {
            self.position = 1;
            true
        } else {
            false
        }
    }

    pub fn advance(&mut self) {
        self.position += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProducerState {
    Idle,
    Streaming,
}

/// Streams the well-log source through a bounded table, one row per tick.
///
/// Each tick appends the single row under the cursor; FIFO eviction slides
/// the visible window once the table is full. At wraparound the table is
/// replaced with the one-row window at the start of the source, restarting
/// the ramp.
pub struct WellLogProducer {
    table_name: String,
    capacity: usize,
    source: SourceFrame,
    cursor: Cursor,
    state: ProducerState,
}

impl WellLogProducer {
    /// # Errors
    ///
    /// Returns `EmptySource` if the source has no rows.
    pub fn new(table_name: impl Into<String>, source: SourceFrame, capacity: usize) -> Result<Self> {
        let cursor = Cursor::new(source.rows.len())?;
        Ok(Self {
            table_name: table_name.into(),
            capacity,
            source,
            cursor,
            state: ProducerState::Idle,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl Producer for WellLogProducer {
    fn setup(&mut self, tables: &mut TableHost, registry: &TableRegistry) -> Result<()> {
        let table = BoundedTable::create(
            self.table_name.clone(),
            self.source.schema.clone(),
            self.capacity,
        )?;
        registry.host(&table)?;
        tables.insert(table)?;
        info!(
            "Hosting table '{}' ({} source rows, window {})",
            self.table_name,
            self.source.rows.len(),
            self.capacity
        );
        Ok(())
    }

    fn tick(&mut self, tables: &mut TableHost) -> Result<()> {
        if self.state == ProducerState::Idle {
            self.state = ProducerState::Streaming;
        }

        if self.cursor.wrap_if_exhausted() {
            debug!("Source exhausted, table '{}' restarting", self.table_name);
            let window = vec![self.source.rows[0].clone()];
            tables.replace(&self.table_name, window)?;
        } else {
            let row = self.source.rows[self.cursor.position() - 1].clone();
            tables.append(&self.table_name, vec![row])?;
        }
        self.cursor.advance();
        Ok(())
    }
}
