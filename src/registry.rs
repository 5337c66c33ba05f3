use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, oneshot};
use tokio::time::timeout;

use crate::error::{Result, TableError};
use crate::runloop::LoopDispatcher;
use crate::schema::Schema;
use crate::table::{BoundedTable, TableDiff, TableHost, TableSnapshot};

/// Serving-side view of a hosted table: its schema plus the diff channel.
/// The table itself lives on the worker loop thread.
#[derive(Clone)]
pub struct TableHandle {
    pub name: String,
    pub schema: Schema,
    updates: broadcast::Sender<Arc<TableDiff>>,
}

impl TableHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TableDiff>> {
        self.updates.subscribe()
    }
}

/// Process-wide table namespace and cross-thread dispatch point.
///
/// Holds one handle per hosted table and the single dispatcher onto the
/// worker loop. Cloning shares the same registry.
#[derive(Clone)]
pub struct TableRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    tables: RwLock<HashMap<String, TableHandle>>,
    dispatcher: RwLock<Option<LoopDispatcher>>,
    dispatch_attempted: AtomicBool,
    dispatch_timeout: Duration,
}

impl TableRegistry {
    pub fn new(dispatch_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tables: RwLock::new(HashMap::new()),
                dispatcher: RwLock::new(None),
                dispatch_attempted: AtomicBool::new(false),
                dispatch_timeout,
            }),
        }
    }

    /// Register a table under its name. Called from the worker thread when a
    /// producer creates its table.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` on collision; the first registration stays
    /// intact.
    pub fn host(&self, table: &BoundedTable) -> Result<()> {
        let mut tables = self.inner.tables.write();
        if tables.contains_key(table.name()) {
            return Err(TableError::DuplicateName(table.name().to_string()));
        }
        tables.insert(
            table.name().to_string(),
            TableHandle {
                name: table.name().to_string(),
                schema: table.schema().clone(),
                updates: table.update_sender(),
            },
        );
        Ok(())
    }

    pub fn table_names(&self) -> Vec<String> {
        self.inner.tables.read().keys().cloned().collect()
    }

    pub fn handle(&self, name: &str) -> Result<TableHandle> {
        self.inner
            .tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TableError::NoSuchTable(name.to_string()))
    }

    pub fn schema(&self, name: &str) -> Result<Schema> {
        Ok(self.handle(name)?.schema)
    }

    /// Subscribe to all future diffs of a table
    pub fn subscribe(&self, name: &str) -> Result<broadcast::Receiver<Arc<TableDiff>>> {
        Ok(self.handle(name)?.subscribe())
    }

    /// Install the worker-loop dispatcher. Must happen exactly once, before
    /// any cross-thread call.
    ///
    /// # Errors
    ///
    /// Returns `DispatcherAlreadySet` on a second call or if a dispatch has
    /// already been attempted.
    pub fn set_dispatcher(&self, dispatcher: LoopDispatcher) -> Result<()> {
        if self.inner.dispatch_attempted.load(Ordering::Acquire) {
            return Err(TableError::DispatcherAlreadySet);
        }
        let mut slot = self.inner.dispatcher.write();
        if slot.is_some() {
            return Err(TableError::DispatcherAlreadySet);
        }
        *slot = Some(dispatcher);
        Ok(())
    }

    fn dispatcher(&self) -> Result<LoopDispatcher> {
        self.inner.dispatch_attempted.store(true, Ordering::Release);
        self.inner
            .dispatcher
            .read()
            .clone()
            .ok_or(TableError::DispatcherNotSet)
    }

    /// Enqueue `f` onto the worker loop and return its completion handle.
    /// Non-blocking; the closure runs FIFO-ordered with ticks and other
    /// dispatches.
    ///
    /// # Errors
    ///
    /// Returns `DispatcherNotSet` or `LoopClosed`.
    pub fn dispatch<R, F>(&self, f: F) -> Result<oneshot::Receiver<R>>
    where
        R: Send + 'static,
        F: FnOnce(&mut TableHost) -> R + Send + 'static,
    {
        self.dispatcher()?.call(move |state| f(&mut state.tables))
    }

    /// Current full snapshot of a table, fetched via the worker loop with
    /// the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns `DispatchTimeout` if the loop did not answer in time,
    /// `NoSuchTable`, `DispatcherNotSet`, or `LoopClosed`.
    pub async fn snapshot(&self, name: &str) -> Result<TableSnapshot> {
        let name = name.to_string();
        let rx = self.dispatch(move |tables| tables.snapshot(&name))?;
        self.await_dispatch(rx).await?
    }

    /// Snapshot a table and transform it with `encode`. In executor dispatch
    /// mode the transform runs on the blocking pool rather than the loop
    /// thread; used by the serving layer to build wire frames.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`snapshot`](Self::snapshot).
    pub async fn snapshot_with<R, F>(&self, name: &str, encode: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(TableSnapshot) -> R + Send + 'static,
    {
        let name = name.to_string();
        let rx = self.dispatcher()?.call_offload(
            move |state| state.tables.snapshot(&name),
            move |snapshot| snapshot.map(encode),
        )?;
        self.await_dispatch(rx).await?
    }

    async fn await_dispatch<R>(&self, rx: oneshot::Receiver<R>) -> Result<R> {
        match timeout(self.inner.dispatch_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(TableError::LoopClosed),
            Err(_) => Err(TableError::DispatchTimeout(self.inner.dispatch_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn table(name: &str) -> BoundedTable {
        let schema = Schema::new(vec![("v".to_string(), ColumnType::Integer)]).unwrap();
        BoundedTable::create(name, schema, 4).unwrap()
    }

    #[test]
    fn duplicate_host_rejected_first_intact() {
        let registry = TableRegistry::new(Duration::from_secs(1));
        let first = table("data_source_one");
        let schema = first.schema().clone();
        registry.host(&first).unwrap();

        let second = BoundedTable::create(
            "data_source_one",
            Schema::new(vec![("other".to_string(), ColumnType::Float)]).unwrap(),
            4,
        )
        .unwrap();
        assert!(matches!(
            registry.host(&second),
            Err(TableError::DuplicateName(name)) if name == "data_source_one"
        ));

        // First registration survives with its own schema
        assert_eq!(registry.schema("data_source_one").unwrap(), schema);
    }

    #[test]
    fn unknown_table_lookup_fails() {
        let registry = TableRegistry::new(Duration::from_secs(1));
        assert!(matches!(
            registry.subscribe("nope"),
            Err(TableError::NoSuchTable(_))
        ));
    }

    #[tokio::test]
    async fn dispatch_before_configuration_fails() {
        let registry = TableRegistry::new(Duration::from_millis(100));
        assert!(matches!(
            registry.snapshot("t").await,
            Err(TableError::DispatcherNotSet)
        ));
    }
}
