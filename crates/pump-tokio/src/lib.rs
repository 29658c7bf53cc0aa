// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Tokio-backed event pump adapter.
//!
//! Implements the [`PumpManager`] contract on a current-thread tokio
//! runtime. Pipelines stay strictly single-threaded: every pump callback
//! runs as a `spawn_local` task inside a [`tokio::task::LocalSet`], so
//! callbacks may capture `Rc` stage handles freely.
//!
//! Pumps must be started from within the `LocalSet`;
//! [`TokioPumpManager::run`] builds the runtime and the set and drives a
//! future to completion, which is the usual entry point of a pipeline
//! binary.

use rivulet_core::error::Result;
use rivulet_core::pump::{Pump, PumpCallback, PumpManager, PumpRef};
use std::cell::{Cell, RefCell};
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Converts 27 MHz ticks to a [`Duration`].
#[allow(clippy::cast_possible_truncation)]
fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_nanos((u128::from(ticks) * 1_000 / 27) as u64)
}

/// Pump manager over the ambient current-thread tokio runtime.
pub struct TokioPumpManager;

impl TokioPumpManager {
    pub fn new() -> Rc<Self> {
        Rc::new(Self)
    }

    /// Builds a current-thread runtime plus `LocalSet` and drives `fut` to
    /// completion. Pumps allocated by this manager must be started from
    /// inside `fut` (or tasks it spawns locally).
    ///
    /// # Panics
    ///
    /// Panics when the tokio runtime cannot be built, which only happens
    /// when the process is out of resources.
    #[allow(clippy::expect_used)]
    pub fn run<F: std::future::Future>(fut: F) -> F::Output {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("tokio current-thread runtime");
        let local = tokio::task::LocalSet::new();
        local.block_on(&runtime, fut)
    }
}

impl PumpManager for TokioPumpManager {
    fn alloc_timer(&self, after: u64, repeat: u64, cb: PumpCallback) -> Result<PumpRef> {
        Ok(TokioPump::alloc(
            PumpKind::Timer {
                after: ticks_to_duration(after),
                repeat: (repeat != 0).then(|| ticks_to_duration(repeat)),
            },
            cb,
        ))
    }

    fn alloc_idler(&self, cb: PumpCallback) -> Result<PumpRef> {
        Ok(TokioPump::alloc(PumpKind::Idler, cb))
    }

    fn alloc_fd_read(&self, fd: RawFd, cb: PumpCallback) -> Result<PumpRef> {
        Ok(TokioPump::alloc(PumpKind::Fd { fd, interest: Interest::READABLE }, cb))
    }

    fn alloc_fd_write(&self, fd: RawFd, cb: PumpCallback) -> Result<PumpRef> {
        Ok(TokioPump::alloc(PumpKind::Fd { fd, interest: Interest::WRITABLE }, cb))
    }
}

#[derive(Clone, Copy)]
enum PumpKind {
    Timer { after: Duration, repeat: Option<Duration> },
    Idler,
    Fd { fd: RawFd, interest: Interest },
}

struct PumpState {
    cb: RefCell<PumpCallback>,
    blocked: Cell<bool>,
    resumed: Notify,
}

impl PumpState {
    /// Parks the pump task while the sink keeps it blocked.
    async fn wait_unblocked(&self) {
        while self.blocked.get() {
            self.resumed.notified().await;
        }
    }

    fn fire(&self) {
        (self.cb.borrow_mut())();
    }
}

/// A pump handle bound to the local tokio reactor.
pub struct TokioPump {
    kind: PumpKind,
    state: Rc<PumpState>,
    task: RefCell<Option<JoinHandle<()>>>,
}

impl TokioPump {
    fn alloc(kind: PumpKind, cb: PumpCallback) -> Rc<Self> {
        Rc::new(Self {
            kind,
            state: Rc::new(PumpState {
                cb: RefCell::new(cb),
                blocked: Cell::new(false),
                resumed: Notify::new(),
            }),
            task: RefCell::new(None),
        })
    }

    fn is_running(&self) -> bool {
        self.task.borrow().as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// Borrows a raw descriptor for reactor registration without owning it;
/// the collaborator that handed the fd to the framework keeps it open for
/// the pump's lifetime.
struct WatchedFd(RawFd);

impl AsRawFd for WatchedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Pump for TokioPump {
    fn start(&self) {
        if self.is_running() {
            return;
        }
        let state = Rc::clone(&self.state);
        let task = match self.kind {
            PumpKind::Timer { after, repeat } => tokio::task::spawn_local(async move {
                tokio::time::sleep(after).await;
                loop {
                    state.wait_unblocked().await;
                    state.fire();
                    match repeat {
                        Some(period) => tokio::time::sleep(period).await,
                        None => break,
                    }
                }
            }),
            PumpKind::Idler => tokio::task::spawn_local(async move {
                loop {
                    tokio::task::yield_now().await;
                    state.wait_unblocked().await;
                    state.fire();
                }
            }),
            PumpKind::Fd { fd, interest } => tokio::task::spawn_local(async move {
                let async_fd = match AsyncFd::with_interest(WatchedFd(fd), interest) {
                    Ok(async_fd) => async_fd,
                    Err(err) => {
                        tracing::error!(fd, "cannot register descriptor with the reactor: {err}");
                        return;
                    },
                };
                loop {
                    match async_fd.ready(interest).await {
                        Ok(mut guard) => {
                            state.wait_unblocked().await;
                            state.fire();
                            // The callback consumes the readiness (reads or
                            // writes the fd); re-poll from scratch.
                            guard.clear_ready();
                        },
                        Err(err) => {
                            tracing::error!(fd, "descriptor watch failed: {err}");
                            return;
                        },
                    }
                }
            }),
        };
        *self.task.borrow_mut() = Some(task);
    }

    fn stop(&self) {
        if let Some(task) = self.task.borrow_mut().take() {
            task.abort();
        }
    }

    fn block(&self) {
        self.state.blocked.set(true);
    }

    fn unblock(&self) {
        self.state.blocked.set(false);
        self.state.resumed.notify_waiters();
    }
}

impl Drop for TokioPump {
    fn drop(&mut self) {
        self.stop();
    }
}
