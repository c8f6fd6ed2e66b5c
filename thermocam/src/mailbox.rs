// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross
//! Bounded blocking queues used to hand frames between pipeline stages.
//!
//! A slot holds either an item or a sentinel (`None`). Sentinels carry no data and exist only to
//! wake a consumer blocked in [`Mailbox::get`] so it can notice it should shut down.
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use arrayvec::ArrayVec;

/// A fixed capacity FIFO shared between threads.
#[derive(Debug)]
pub struct Mailbox<T, const N: usize> {
    slots: Mutex<ArrayVec<Option<T>, N>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T, const N: usize> Mailbox<T, N> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(ArrayVec::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    // A panic while holding the lock can't leave the queue half-modified, so poisoning is
    // ignored.
    fn lock(&self) -> MutexGuard<'_, ArrayVec<Option<T>, N>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `item` without blocking, handing it back if the mailbox is full.
    pub fn try_put(&self, item: T) -> Result<(), T> {
        let mut slots = self.lock();
        if slots.is_full() {
            return Err(item);
        }
        slots.push(Some(item));
        self.not_empty.notify_one();
        Ok(())
    }

    /// Add `item`, waiting for space if the mailbox is full.
    pub fn put(&self, item: T) {
        let mut slots = self.lock();
        while slots.is_full() {
            slots = self
                .not_full
                .wait(slots)
                .unwrap_or_else(PoisonError::into_inner);
        }
        slots.push(Some(item));
        self.not_empty.notify_one();
    }

    /// Like [`put`][Mailbox::put], but gives up (handing `item` back) once `cancelled` returns
    /// true.
    ///
    /// `cancelled` is checked with the mailbox locked, each time the producer wakes up. Anything
    /// that makes it return true should be followed by [`wake_all`][Mailbox::wake_all].
    pub fn put_unless<F>(&self, item: T, cancelled: F) -> Result<(), T>
    where
        F: Fn() -> bool,
    {
        let mut slots = self.lock();
        while slots.is_full() {
            if cancelled() {
                return Err(item);
            }
            slots = self
                .not_full
                .wait(slots)
                .unwrap_or_else(PoisonError::into_inner);
        }
        slots.push(Some(item));
        self.not_empty.notify_one();
        Ok(())
    }

    /// Wake every thread blocked on this mailbox so it re-checks its condition.
    pub fn wake_all(&self) {
        // Holding the lock orders this after any waiter's check of its cancellation flag.
        let _slots = self.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Take the oldest entry, waiting if there isn't one.
    ///
    /// Returns `None` when the entry taken was a sentinel.
    pub fn get(&self) -> Option<T> {
        let mut slots = self.lock();
        while slots.is_empty() {
            slots = self
                .not_empty
                .wait(slots)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let entry = slots.remove(0);
        self.not_full.notify_one();
        entry
    }

    /// Take the oldest entry if there is one, without blocking.
    ///
    /// The outer `Option` is whether there was an entry, the inner one whether it was a sentinel.
    pub fn try_get(&self) -> Option<Option<T>> {
        let mut slots = self.lock();
        if slots.is_empty() {
            return None;
        }
        let entry = slots.remove(0);
        self.not_full.notify_one();
        Some(entry)
    }

    /// Queue a sentinel, but only if nothing is queued already.
    ///
    /// A consumer blocked in [`get`][Mailbox::get] is only waiting if the mailbox is empty, so
    /// this is enough to wake it. Returns whether a sentinel was queued.
    pub fn inject_sentinel_if_empty(&self) -> bool {
        let mut slots = self.lock();
        if !slots.is_empty() {
            return false;
        }
        slots.push(None);
        self.not_empty.notify_all();
        true
    }

    /// Entries currently queued, sentinels included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }
}

impl<T, const N: usize> Default for Mailbox<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
