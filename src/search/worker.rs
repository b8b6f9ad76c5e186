use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::search::engine::Shared;
use crate::search::search::SearchContext;
use crate::search::split::SplitPoint;

/// Hard cap from the servant mask width.
pub const MAX_WORKERS: usize = 64;

enum Job {
    Split(Arc<SplitPoint>),
    Quit,
}

/// Distributes published split points to idle workers. The channel is
/// multi-consumer, so a published split point lands on whichever worker
/// wakes first; stale deliveries are discarded by the join handshake.
pub struct Balancer {
    tx: Sender<Job>,
    rx: Receiver<Job>,
    idle: AtomicUsize,
    registry: Mutex<Vec<Weak<SplitPoint>>>,
}

impl Balancer {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Balancer { tx, rx, idle: AtomicUsize::new(0), registry: Mutex::new(Vec::new()) }
    }

    #[inline(always)]
    pub fn has_idle(&self) -> bool {
        self.idle.load(Ordering::Relaxed) > 0
    }

    /// Announces a split point: one delivery per currently idle worker,
    /// plus a registry entry for helpful masters to find later.
    pub fn publish(&self, sp: &Arc<SplitPoint>) {
        {
            let mut registry = self.registry.lock().unwrap();
            registry.retain(|weak| weak.strong_count() > 0);
            registry.push(Arc::downgrade(sp));
        }
        let deliveries = self.idle.load(Ordering::Relaxed);
        for _ in 0..deliveries {
            let _ = self.tx.send(Job::Split(Arc::clone(sp)));
        }
    }

    /// An active split point below `ancestor` that still has moves to
    /// hand out; what a helpful master is allowed to adopt.
    pub fn find_helpable(
        &self,
        ancestor: &Arc<SplitPoint>,
        worker_id: usize,
    ) -> Option<Arc<SplitPoint>> {
        let registry = self.registry.lock().unwrap();
        for weak in registry.iter() {
            let Some(sp) = weak.upgrade() else { continue };
            if Arc::ptr_eq(&sp, ancestor) {
                continue;
            }
            if sp.moves_exhausted.load(Ordering::Relaxed) || sp.is_cancelled() {
                continue;
            }
            if sp.master == worker_id {
                continue;
            }
            if !sp.descends_from(ancestor) {
                continue;
            }
            let inner = sp.inner.lock().unwrap();
            if inner.cutoff || inner.worker_finished {
                continue;
            }
            if inner.servant_mask & (1u64 << worker_id) != 0 {
                continue;
            }
            drop(inner);
            return Some(sp);
        }
        None
    }

    pub fn shutdown(&self, workers: usize) {
        for _ in 0..workers {
            let _ = self.tx.send(Job::Quit);
        }
    }
}

impl Default for Balancer {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the helper pool. Worker 0 is the search driver's own thread;
/// helpers take ids 1..=n and live until the engine drops.
pub fn spawn_workers(shared: &Arc<Shared>, count: usize) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(count);
    for id in 1..=count.min(MAX_WORKERS - 1) {
        let shared = Arc::clone(shared);
        let handle = std::thread::Builder::new()
            .name(format!("ferrum-worker-{id}"))
            .spawn(move || worker_loop(shared, id))
            .expect("failed to spawn search worker");
        handles.push(handle);
    }
    handles
}

fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    let mut ctx = SearchContext::new(Arc::clone(&shared), worker_id);
    log::debug!("worker {} up", worker_id);
    loop {
        shared.balancer.idle.fetch_add(1, Ordering::Relaxed);
        let job = shared.balancer.rx.recv();
        shared.balancer.idle.fetch_sub(1, Ordering::Relaxed);

        match job {
            Ok(Job::Split(sp)) => {
                if shared.aborted() || sp.is_cancelled() {
                    continue;
                }
                if !sp.try_join(worker_id) {
                    continue;
                }
                shared.stats.split_joins.fetch_add(1, Ordering::Relaxed);
                ctx.refresh_params();
                ctx.reps = Arc::clone(&sp.reps);
                ctx.serve_split(&sp);
                sp.leave(worker_id);
                ctx.flush_nodes();
            }
            Ok(Job::Quit) | Err(_) => break,
        }
    }
    log::debug!("worker {} down", worker_id);
}
