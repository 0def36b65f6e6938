//! Packet worker threads
//!
//! Each worker is an OS thread running a current-thread tokio runtime. It
//! owns its engine outright; the control loop reaches it only through a
//! channel, either to stop it (the engine comes back through the join
//! handle) or to run a closure against it, which is how dumps read the
//! worker-owned tables.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::capture::FrameSource;
use crate::protocol::ethernet::MAX_FRAME_SIZE;
use crate::{Error, Result};

/// Frames drained per readiness event
pub const MAX_RECV: usize = 128;

/// Per-frame packet processing, driven by a worker.
pub trait PacketEngine: Send + 'static {
    fn process(&mut self, frame: &mut [u8]);

    /// Runs after every wakeup; returns how long the next wait may last,
    /// `None` to wait for traffic only.
    fn after_wakeup(&mut self) -> Option<Duration> {
        None
    }

    /// A wait ran out without traffic.
    fn on_timeout(&mut self) {}
}

type Inspect<E> = Box<dyn FnOnce(&E) + Send>;

enum Control<E> {
    Stop,
    Inspect(Inspect<E>),
}

/// Resolves once the worker's socket is registered with its runtime.
pub struct Ready(oneshot::Receiver<Result<()>>);

impl Ready {
    pub async fn wait(self) -> Result<()> {
        self.0.await.unwrap_or_else(|_| Err(exited()))
    }

    /// Blocking variant, for callers outside any runtime.
    pub fn wait_blocking(self) -> Result<()> {
        self.0.blocking_recv().unwrap_or_else(|_| Err(exited()))
    }
}

fn exited() -> Error {
    Error::Io(io::Error::other("worker exited before start"))
}

/// Handle to a running worker.
pub struct WorkerHandle<E> {
    name: String,
    control: mpsc::UnboundedSender<Control<E>>,
    thread: JoinHandle<E>,
}

/// Starts a worker reading from `source` into `engine`.
pub fn spawn<E, S>(name: &str, source: Arc<S>, engine: E) -> Result<(WorkerHandle<E>, Ready)>
where
    E: PacketEngine,
    S: FrameSource,
{
    let (control, rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    let thread = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || run(source, engine, rx, ready_tx))?;
    info!(worker = name, "worker started");
    Ok((
        WorkerHandle {
            name: name.to_string(),
            control,
            thread,
        },
        Ready(ready_rx),
    ))
}

impl<E: PacketEngine> WorkerHandle<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Runs `f` on the worker thread between two bursts of traffic and
    /// returns its result. `None` when the worker is gone.
    pub async fn inspect<F, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&E) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Inspect<E> = Box::new(move |engine| {
            let _ = tx.send(f(engine));
        });
        self.control.send(Control::Inspect(job)).ok()?;
        rx.await.ok()
    }

    /// Stops the worker and hands back its engine. Blocks until the thread
    /// has left its loop.
    pub fn stop(self) -> Option<E> {
        let _ = self.control.send(Control::Stop);
        match self.thread.join() {
            Ok(engine) => {
                info!(worker = %self.name, "worker stopped");
                Some(engine)
            }
            Err(_) => {
                warn!(worker = %self.name, "worker panicked");
                None
            }
        }
    }
}

fn run<E, S>(
    source: Arc<S>,
    mut engine: E,
    mut control: mpsc::UnboundedReceiver<Control<E>>,
    ready: oneshot::Sender<Result<()>>,
) -> E
where
    E: PacketEngine,
    S: FrameSource,
{
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return engine;
        }
    };

    runtime.block_on(async {
        let fd = match AsyncFd::with_interest(source, Interest::READABLE) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = ready.send(Err(Error::Socket {
                    op: "register socket",
                    source: e,
                }));
                return;
            }
        };
        let _ = ready.send(Ok(()));

        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let mut timeout = engine.after_wakeup();
        loop {
            let wait = async {
                match timeout {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                cmd = control.recv() => match cmd {
                    Some(Control::Inspect(job)) => {
                        job(&engine);
                        continue;
                    }
                    Some(Control::Stop) | None => break,
                },
                guard = fd.readable() => match guard {
                    Ok(mut guard) => {
                        if drain(guard.get_inner().as_ref(), &mut buf, &mut engine) {
                            guard.clear_ready();
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "socket readiness failed");
                        break;
                    }
                },
                _ = wait => engine.on_timeout(),
            }
            timeout = engine.after_wakeup();
        }
        debug!("worker loop left");
    });
    engine
}

/// Hands up to [`MAX_RECV`] queued frames to `engine`. Returns whether the
/// queue ran dry.
fn drain<E, S>(source: &S, buf: &mut [u8], engine: &mut E) -> bool
where
    E: PacketEngine,
    S: FrameSource + ?Sized,
{
    for _ in 0..MAX_RECV {
        match source.recv_frame(buf) {
            Ok(Some(0)) => {}
            Ok(Some(n)) => engine.process(&mut buf[..n]),
            Ok(None) => return true,
            Err(e) => {
                warn!(error = %e, "recv failed");
                return true;
            }
        }
    }
    false
}
