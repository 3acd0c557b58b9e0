// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Bounded, thread-safe capture history with change notification.

use crate::capture::{Capture, DashboardItem};
use std::collections::VecDeque;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

struct Inner {
    captures: VecDeque<Capture>,
    /// Last id handed out. Survives `remove_all`.
    last_id: u64,
}

/// Thread-safe store for recent captures.
///
/// Captures are kept in insertion order (oldest first) and the oldest entry is
/// evicted once `capacity` is exceeded. Every mutation bumps a generation
/// counter published through a `watch` channel so that observers can block
/// until something changes.
pub struct CaptureStore {
    inner: RwLock<Inner>,
    capacity: usize,
    generation: watch::Sender<u64>,
}

/// Result of waiting on a [`ChangeWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The store was mutated since this watcher last looked.
    Changed,
    /// The caller's cancellation token fired first.
    Cancelled,
    /// The store was dropped.
    Closed,
}

/// A registration on the store's change signal.
///
/// A watcher remembers the last generation it observed, so a mutation that
/// lands between two `wait` calls is reported by the second one.
pub struct ChangeWatcher {
    rx: watch::Receiver<u64>,
}

impl ChangeWatcher {
    /// Treat the current generation as observed.
    pub fn mark_seen(&mut self) {
        self.rx.borrow_and_update();
    }

    /// Block until the store changes past the last observed generation, or
    /// until `cancel` fires.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> WaitOutcome {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
            res = self.rx.changed() => match res {
                Ok(()) => WaitOutcome::Changed,
                Err(_) => WaitOutcome::Closed,
            },
        }
    }
}

impl CaptureStore {
    pub fn new(capacity: usize) -> Self {
        let (generation, _) = watch::channel(0u64);
        Self {
            inner: RwLock::new(Inner {
                captures: VecDeque::with_capacity(capacity.min(1024)),
                last_id: 0,
            }),
            capacity,
            generation,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| {
            tracing::warn!("CaptureStore lock poisoned during read");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| {
            tracing::warn!("CaptureStore lock poisoned during write");
            poisoned.into_inner()
        })
    }

    fn notify(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Assign the next id to `capture`, append it and evict past capacity.
    ///
    /// Returns the assigned id. Ids are handed out in the order callers
    /// acquire the write lock.
    pub fn insert(&self, mut capture: Capture) -> u64 {
        let id = {
            let mut inner = self.write();
            inner.last_id += 1;
            let id = inner.last_id;
            capture.id = id;
            inner.captures.push_back(capture);
            while inner.captures.len() > self.capacity {
                inner.captures.pop_front();
            }
            id
        };
        self.notify();
        id
    }

    /// Look up a capture by id. Returns an owned copy.
    pub fn find(&self, id: u64) -> Option<Capture> {
        let inner = self.read();
        // ids are strictly increasing along the deque
        inner
            .captures
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .and_then(|idx| inner.captures.get(idx).cloned())
    }

    /// Drop every capture. The id counter keeps going.
    pub fn remove_all(&self) {
        self.write().captures.clear();
        self.notify();
    }

    /// Point-in-time copy of all captures, oldest first.
    pub fn snapshot(&self) -> Vec<Capture> {
        self.read().captures.iter().cloned().collect()
    }

    /// Point-in-time summaries of all captures, oldest first.
    pub fn dashboard_items(&self) -> Vec<DashboardItem> {
        self.read().captures.iter().map(Capture::to_item).collect()
    }

    pub fn len(&self) -> usize {
        self.read().captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register for change notification starting from the current generation.
    pub fn subscribe(&self) -> ChangeWatcher {
        ChangeWatcher {
            rx: self.generation.subscribe(),
        }
    }

    /// Block until the next mutation after this call, or until `cancel` fires.
    pub async fn wait_for_change(&self, cancel: &CancellationToken) -> WaitOutcome {
        self.subscribe().wait(cancel).await
    }
}
