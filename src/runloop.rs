use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::error::{Result, TableError};
use crate::producer::Producer;
use crate::registry::TableRegistry;
use crate::scheduler::TickTimer;
use crate::table::TableHost;

/// How cross-thread calls reach the worker loop.
///
/// `Direct` runs dispatched work entirely on the loop thread. `Executor`
/// additionally offloads the encode half of [`LoopDispatcher::call_offload`]
/// to the tokio blocking pool, keeping CPU-bound serialization off the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Direct,
    Executor,
}

/// Poll interval while the tick timer is stopped
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// State owned by the worker loop thread
pub struct WorkerState {
    pub tables: TableHost,
    pub ticker: TickTimer,
}

type Job = Box<dyn FnOnce(&mut WorkerState) + Send>;

/// Cross-thread entry point onto the worker loop. Cheap to clone; every
/// clone feeds the same FIFO job queue.
#[derive(Clone)]
pub struct LoopDispatcher {
    job_tx: mpsc::Sender<Job>,
    mode: DispatchMode,
    runtime: Handle,
}

impl LoopDispatcher {
    /// Marshal `f` onto the worker loop. Returns immediately with a oneshot
    /// receiver that is fulfilled on the loop thread; jobs run in dispatch
    /// order, interleaved FIFO with scheduler ticks.
    ///
    /// # Errors
    ///
    /// Returns `LoopClosed` if the worker thread has exited.
    pub fn call<R, F>(&self, f: F) -> Result<oneshot::Receiver<R>>
    where
        R: Send + 'static,
        F: FnOnce(&mut WorkerState) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |state| {
            // Caller may have given up waiting; that is their business
            let _ = tx.send(f(state));
        });
        self.job_tx.send(job).map_err(|_| TableError::LoopClosed)?;
        Ok(rx)
    }

    /// Two-phase dispatch: `extract` runs on the loop thread, `encode` runs
    /// on the loop in `Direct` mode or on the blocking pool in `Executor`
    /// mode. Used for snapshot serialization so large encodes don't stall
    /// ticks.
    ///
    /// # Errors
    ///
    /// Returns `LoopClosed` if the worker thread has exited.
    pub fn call_offload<T, R, F, G>(&self, extract: F, encode: G) -> Result<oneshot::Receiver<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: FnOnce(&mut WorkerState) -> T + Send + 'static,
        G: FnOnce(T) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mode = self.mode;
        let runtime = self.runtime.clone();
        let job: Job = Box::new(move |state| {
            let value = extract(state);
            match mode {
                DispatchMode::Direct => {
                    let _ = tx.send(encode(value));
                }
                DispatchMode::Executor => {
                    runtime.spawn_blocking(move || {
                        let _ = tx.send(encode(value));
                    });
                }
            }
        });
        self.job_tx.send(job).map_err(|_| TableError::LoopClosed)?;
        Ok(rx)
    }
}

/// Handle to the worker thread's event loop. The thread itself is detached;
/// it exits when every dispatcher clone (including the registry's) is gone,
/// or with the process.
pub struct RunLoop {
    dispatcher: LoopDispatcher,
}

impl RunLoop {
    /// Spawn the worker thread, run every producer's setup on it, and block
    /// until setup completes. Table creation errors are fatal and returned
    /// here; after a successful spawn the tick timer is running.
    ///
    /// # Errors
    ///
    /// Propagates producer setup failures (bad schema, duplicate name, empty
    /// source) and thread spawn failures.
    pub fn spawn(
        producers: Vec<Box<dyn Producer>>,
        registry: &TableRegistry,
        period: Duration,
        jitter: f64,
        mode: DispatchMode,
        runtime: Handle,
    ) -> Result<RunLoop> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (setup_tx, setup_rx) = mpsc::channel::<Result<()>>();
        let registry = registry.clone();

        thread::Builder::new()
            .name("tablecast-runloop".to_string())
            .spawn(move || run(producers, registry, job_rx, setup_tx, period, jitter))?;

        match setup_rx.recv() {
            Ok(result) => result?,
            Err(_) => return Err(TableError::LoopClosed),
        }

        Ok(RunLoop {
            dispatcher: LoopDispatcher {
                job_tx,
                mode,
                runtime,
            },
        })
    }

    pub fn dispatcher(&self) -> LoopDispatcher {
        self.dispatcher.clone()
    }

    /// Resume periodic ticks. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `LoopClosed` if the worker thread has exited.
    pub fn start_ticks(&self) -> Result<()> {
        self.dispatcher.call(|state| state.ticker.start())?;
        Ok(())
    }

    /// Stop periodic ticks; in-flight dispatched jobs still run. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `LoopClosed` if the worker thread has exited.
    pub fn stop_ticks(&self) -> Result<()> {
        self.dispatcher.call(|state| state.ticker.stop())?;
        Ok(())
    }
}

/// The worker loop body. Single-threaded, run-to-completion: drains the job
/// queue FIFO and fires producer ticks at the timer's jittered deadlines,
/// so a snapshot dispatched between two ticks observes exactly the state
/// between them.
fn run(
    mut producers: Vec<Box<dyn Producer>>,
    registry: TableRegistry,
    job_rx: mpsc::Receiver<Job>,
    setup_tx: mpsc::Sender<Result<()>>,
    period: Duration,
    jitter: f64,
) {
    let mut state = WorkerState {
        tables: TableHost::new(),
        ticker: TickTimer::new(period, jitter),
    };

    let mut setup = Ok(());
    for producer in &mut producers {
        if let Err(e) = producer.setup(&mut state.tables, &registry) {
            error!("Producer setup failed: {}", e);
            setup = Err(e);
            break;
        }
    }
    let ok = setup.is_ok();
    let _ = setup_tx.send(setup);
    if !ok {
        return;
    }

    state.ticker.start();
    let mut rng = rand::thread_rng();
    let mut next_tick = state.ticker.next_deadline(Instant::now(), &mut rng);
    info!("Worker loop started, tick period {:?}", period);

    loop {
        let wait = if state.ticker.is_running() {
            next_tick.saturating_duration_since(Instant::now())
        } else {
            IDLE_WAIT
        };

        match job_rx.recv_timeout(wait) {
            Ok(job) => job(&mut state),
            Err(RecvTimeoutError::Timeout) => {
                if state.ticker.is_running() && Instant::now() >= next_tick {
                    for producer in &mut producers {
                        // A failed tick is logged and skipped; the table is
                        // unchanged and the loop keeps going
                        if let Err(e) = producer.tick(&mut state.tables) {
                            warn!("Producer tick failed: {}", e);
                        }
                    }
                }
                next_tick = state.ticker.next_deadline(Instant::now(), &mut rng);
            }
            Err(RecvTimeoutError::Disconnected) => {
                info!("All dispatchers dropped, worker loop exiting");
                break;
            }
        }
    }
}
