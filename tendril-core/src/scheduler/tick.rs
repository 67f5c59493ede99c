//! Tick Driving
//!
//! A tick is the boundary at which queued work is flushed. Ticks can be
//! driven by hand with [`ReactiveGraph::tick`], or by a tokio task on a
//! `LocalSet` that waits for the graph to request one:
//!
//! ```rust,ignore
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let graph = ReactiveGraph::new();
//!     graph.spawn_local_driver();
//!
//!     state.set("count", 1);
//!     graph.next_tick().await;
//!     // Everything that depended on `count` has re-run.
//! }).await;
//! ```

use std::future::Future;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::reactive::ReactiveGraph;

use super::queue::FlushReport;

impl ReactiveGraph {
    /// Run one tick: flush if a flush was requested, otherwise run any
    /// deferred callbacks.
    pub fn tick(&self) -> FlushReport {
        let scheduler = self.scheduler();
        if scheduler.is_waiting() {
            self.flush()
        } else {
            scheduler.run_deferred();
            FlushReport::default()
        }
    }

    /// Run `callback` once, after the next flush's completion hooks.
    pub fn defer(&self, callback: impl FnOnce() + 'static) {
        let scheduler = self.scheduler();
        let first = !scheduler.has_deferred();
        scheduler.defer(Box::new(callback));
        if first && !scheduler.is_waiting() && !scheduler.is_flushing() {
            self.tick_signal().notify_one();
        }
    }

    /// Resolves once the next tick has finished.
    pub fn next_tick(&self) -> impl Future<Output = ()> + 'static {
        let (tx, rx) = oneshot::channel();
        self.defer(move || {
            let _ = tx.send(());
        });
        async move {
            let _ = rx.await;
        }
    }

    /// Whether there is work waiting for a tick.
    pub fn has_pending_tick(&self) -> bool {
        let scheduler = self.scheduler();
        scheduler.is_waiting() || scheduler.has_deferred()
    }

    pub fn is_flushing(&self) -> bool {
        self.scheduler().is_flushing()
    }

    /// Spawn a task on the current `LocalSet` that runs a tick whenever one
    /// is requested. The task holds only a weak handle and exits once the
    /// graph is dropped.
    ///
    /// Must be called from within a `LocalSet`.
    pub fn spawn_local_driver(&self) -> JoinHandle<()> {
        let signal = self.tick_signal().clone();
        let weak = self.downgrade();
        tokio::task::spawn_local(async move {
            debug!("tick driver started");
            loop {
                signal.notified().await;
                // Let the current task finish its synchronous writes first.
                tokio::task::yield_now().await;
                let Some(graph) = weak.upgrade() else {
                    break;
                };
                if graph.has_pending_tick() {
                    let report = graph.tick();
                    graph.forward_unhandled(report);
                }
            }
            debug!("tick driver stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn tick_without_queue_runs_deferred_only() {
        let graph = ReactiveGraph::new();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        graph.defer(move || flag.set(true));

        assert!(graph.has_pending_tick());
        let report = graph.tick();
        assert!(report.is_empty());
        assert!(ran.get());
        assert!(!graph.has_pending_tick());
    }

    #[tokio::test]
    async fn next_tick_resolves_under_driver() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let graph = ReactiveGraph::new();
                let driver = graph.spawn_local_driver();

                graph.next_tick().await;
                assert!(!graph.has_pending_tick());

                drop(graph);
                driver.await.unwrap();
            })
            .await;
    }
}
