use std::{
    sync::{Mutex, PoisonError},
    thread,
};

use log::trace;

use crate::{error::Result, scene::triangle_bvh::StackCache};

/// Processes work items on up to `worker_count` threads.
///
/// The calling thread is one of the workers, the rest are scoped threads named `rayquery-worker{n}`.
/// Workers pull items from a shared queue until it is empty, each owns a traversal stack
/// that is reused between its items. Returns once every item is processed.
///
/// If a worker thread fails to spawn, the remaining workers still process everything
/// and the spawn error is returned afterwards.
pub(crate) fn for_each_work_item<T: Send>(
    items: Vec<T>,
    worker_count: usize,
    process: impl Fn(T, &mut StackCache) + Sync,
) -> Result<()> {
    let worker_count = worker_count.clamp(1, items.len().max(1));

    if worker_count == 1 {
        let mut stack = StackCache::default();
        items
            .into_iter()
            .for_each(|item| process(item, &mut stack));
        return Ok(());
    }

    trace!(
        "Distributing {} work items to {} workers",
        items.len(),
        worker_count
    );

    let queue = Mutex::new(items.into_iter());
    let worker = |_worker_id: usize| {
        let mut stack = StackCache::default();
        loop {
            // The lock is released before the item is processed
            let item = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
            let Some(item) = item else {
                break;
            };
            process(item, &mut stack);
        }
    };

    thread::scope(|scope| {
        let spawned = (1..worker_count)
            .map(|worker_id| {
                thread::Builder::new()
                    .name(format!("rayquery-worker{worker_id}"))
                    .spawn_scoped(scope, move || worker(worker_id))
            })
            .collect::<Result<Vec<_>, _>>();

        worker(0);

        // Worker panics are propagated when the scope ends
        spawned.map(|_handles| ()).map_err(Into::into)
    })
}
