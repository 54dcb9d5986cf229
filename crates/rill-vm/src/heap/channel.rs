// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded blocking channels.
//!
//! A channel is a fixed-capacity ring of values guarded by one mutex and
//! two condition variables: `has_items` (signaled by writers) and
//! `has_space` (signaled by readers and by online growth). Readers block
//! while the ring is empty, writers while it is full.
//!
//! The pool stores channels behind an `Arc` so a blocked operation never
//! holds any pool lock; a reader parked on an otherwise dead channel
//! keeps only the ring itself alive.
//!
//! # Closure
//!
//! Releasing the last pool reference closes the channel: buffered values
//! are drained and released, every parked reader and writer wakes, and
//! all further operations report [`Error::ChannelClosed`]. Values are
//! delivered to exactly one reader each; order is FIFO per producer and
//! per consumer.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::{ChannelHandle, Heap};
use crate::value::Value;
use crate::{Error, Result};

struct Ring {
    buf: Vec<Option<Value>>,
    start: usize,
    count: usize,
    closed: bool,
}

impl Ring {
    /// Straighten the ring into a fresh buffer of `capacity` slots.
    /// Caller guarantees `capacity >= self.count`.
    fn rebuild(&mut self, capacity: usize) {
        let mut buf: Vec<Option<Value>> = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        let len = self.buf.len();
        for i in 0..self.count {
            buf[i] = self.buf[(self.start + i) % len].take();
        }
        self.buf = buf;
        self.start = 0;
    }
}

/// A bounded blocking queue of values.
pub struct Channel {
    state: Mutex<Ring>,
    has_items: Condvar,
    has_space: Condvar,
}

impl Channel {
    /// Create a channel buffering up to `capacity` values.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Channel {
            state: Mutex::new(Ring {
                buf,
                start: 0,
                count: 0,
                closed: false,
            }),
            has_items: Condvar::new(),
            has_space: Condvar::new(),
        }
    }

    /// Take the oldest value, blocking while the channel is empty.
    pub fn read(&self) -> Result<Value> {
        let mut ring = self.state.lock();
        while ring.count == 0 && !ring.closed {
            self.has_items.wait(&mut ring);
        }
        if ring.count == 0 {
            return Err(Error::ChannelClosed);
        }
        let start = ring.start;
        let value = ring.buf[start].take().ok_or(Error::ChannelClosed)?;
        ring.start = (ring.start + 1) % ring.buf.len();
        ring.count -= 1;
        drop(ring);

        // notify_all: writers and a concurrent shrink both wait on
        // has_space; a single token could land on the wrong one.
        self.has_space.notify_all();
        Ok(value)
    }

    /// Non-blocking read: `Ok(None)` when the channel is empty but open.
    pub fn try_read(&self) -> Result<Option<Value>> {
        let mut ring = self.state.lock();
        if ring.count == 0 {
            return if ring.closed {
                Err(Error::ChannelClosed)
            } else {
                Ok(None)
            };
        }
        let start = ring.start;
        let value = ring.buf[start].take().ok_or(Error::ChannelClosed)?;
        ring.start = (ring.start + 1) % ring.buf.len();
        ring.count -= 1;
        drop(ring);

        self.has_space.notify_all();
        Ok(Some(value))
    }

    /// Append a value, blocking while the channel is full.
    ///
    /// On a closed channel the value is handed back so the caller can
    /// release it.
    pub fn write(&self, value: Value) -> std::result::Result<(), Value> {
        let mut ring = self.state.lock();
        while ring.count >= ring.buf.len() && !ring.closed {
            self.has_space.wait(&mut ring);
        }
        if ring.closed {
            return Err(value);
        }
        let index = (ring.start + ring.count) % ring.buf.len();
        ring.buf[index] = Some(value);
        ring.count += 1;
        drop(ring);

        self.has_items.notify_one();
        Ok(())
    }

    /// Enlarge the ring online. Growing to the current capacity or less
    /// does nothing. Wakes writers parked on a full ring.
    pub fn grow(&self, capacity: usize) {
        let mut ring = self.state.lock();
        if capacity > ring.buf.len() {
            ring.rebuild(capacity);
            drop(ring);
            self.has_space.notify_all();
        }
    }

    /// Shrink the ring, waiting until the buffered count fits. Shrinking
    /// to the current capacity or more (or to zero) does nothing.
    pub fn shrink(&self, capacity: usize) {
        if capacity == 0 {
            return;
        }
        let mut ring = self.state.lock();
        while ring.count > capacity && !ring.closed {
            self.has_space.wait(&mut ring);
        }
        if capacity < ring.buf.len() && ring.count <= capacity {
            ring.rebuild(capacity);
        }
    }

    /// Close the channel and drain whatever is buffered; wakes everyone.
    pub fn close(&self) -> Vec<Value> {
        let mut ring = self.state.lock();
        ring.closed = true;
        let mut drained = Vec::with_capacity(ring.count);
        let len = ring.buf.len();
        for i in 0..ring.count {
            let idx = (ring.start + i) % len;
            if let Some(v) = ring.buf[idx].take() {
                drained.push(v);
            }
        }
        ring.count = 0;
        drop(ring);

        self.has_items.notify_all();
        self.has_space.notify_all();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Values currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current ring capacity.
    pub fn capacity(&self) -> usize {
        self.state.lock().buf.len()
    }
}

impl Heap {
    /// Allocate a channel with refcount 1. Channels are always shared:
    /// crossing threads is their whole point.
    pub fn channel_allocate(&self, capacity: usize) -> ChannelHandle {
        self.channels
            .allocate_with(true, Arc::new(Channel::new(capacity)))
    }

    pub fn channel_reference(&self, handle: ChannelHandle) -> ChannelHandle {
        self.channels.reference(handle)
    }

    /// Give up one reference; the last one closes the channel and
    /// releases anything still buffered.
    pub fn channel_release(&self, handle: ChannelHandle) {
        if let Some(channel) = self.channels.release(handle) {
            for value in channel.close() {
                self.release_value(value);
            }
        }
    }

    /// Clone out the ring itself; blocking ops go through the `Arc`, not
    /// the pool.
    pub fn channel_get(&self, handle: ChannelHandle) -> Arc<Channel> {
        self.channels.with(handle, Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_per_single_producer() {
        let ch = Channel::new(4);
        for i in 0..4 {
            ch.write(Value::Int(i)).unwrap();
        }
        for i in 0..4 {
            assert_eq!(ch.read().unwrap(), Value::Int(i));
        }
        assert_eq!(ch.try_read().unwrap(), None);
    }

    #[test]
    fn capacity_bounds_buffering() {
        let ch = Arc::new(Channel::new(1));
        ch.write(Value::Int(1)).unwrap();
        assert_eq!(ch.len(), 1);

        // A second write must block until the reader drains one.
        let writer = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.write(Value::Int(2)).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ch.len(), 1);

        assert_eq!(ch.read().unwrap(), Value::Int(1));
        writer.join().unwrap();
        assert_eq!(ch.read().unwrap(), Value::Int(2));
    }

    #[test]
    fn blocked_reader_wakes_on_write() {
        let ch = Arc::new(Channel::new(2));
        let reader = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.read().unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        ch.write(Value::Str("ping".into())).unwrap();
        assert_eq!(reader.join().unwrap(), Value::Str("ping".into()));
    }

    #[test]
    fn close_wakes_blocked_reader_with_closed() {
        let ch = Arc::new(Channel::new(2));
        let reader = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.read())
        };
        thread::sleep(Duration::from_millis(20));
        let drained = ch.close();
        assert!(drained.is_empty());
        assert!(matches!(reader.join().unwrap(), Err(Error::ChannelClosed)));
    }

    #[test]
    fn close_hands_back_buffered_values_and_fails_writes() {
        let ch = Channel::new(4);
        ch.write(Value::Int(1)).unwrap();
        ch.write(Value::Int(2)).unwrap();

        let drained = ch.close();
        assert_eq!(drained, vec![Value::Int(1), Value::Int(2)]);
        assert!(ch.write(Value::Int(3)).is_err());
        assert!(matches!(ch.read(), Err(Error::ChannelClosed)));
    }

    #[test]
    fn grow_unblocks_a_full_writer() {
        let ch = Arc::new(Channel::new(1));
        ch.write(Value::Int(1)).unwrap();

        let writer = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.write(Value::Int(2)).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        ch.grow(4);
        writer.join().unwrap();

        assert_eq!(ch.capacity(), 4);
        assert_eq!(ch.read().unwrap(), Value::Int(1));
        assert_eq!(ch.read().unwrap(), Value::Int(2));
    }

    #[test]
    fn shrink_waits_for_drain() {
        let ch = Arc::new(Channel::new(4));
        for i in 0..3 {
            ch.write(Value::Int(i)).unwrap();
        }

        let shrinker = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.shrink(1))
        };
        thread::sleep(Duration::from_millis(20));
        // Still 4: three values are buffered.
        assert_eq!(ch.capacity(), 4);

        assert_eq!(ch.read().unwrap(), Value::Int(0));
        assert_eq!(ch.read().unwrap(), Value::Int(1));
        shrinker.join().unwrap();
        assert_eq!(ch.capacity(), 1);
        assert_eq!(ch.read().unwrap(), Value::Int(2));
    }

    #[test]
    fn each_value_goes_to_exactly_one_reader() {
        let ch = Arc::new(Channel::new(8));
        let mut readers = Vec::new();
        for _ in 0..4 {
            let ch = Arc::clone(&ch);
            readers.push(thread::spawn(move || {
                let mut got = Vec::new();
                while let Ok(v) = ch.read() {
                    got.push(v.as_int());
                }
                got
            }));
        }

        for i in 0..100 {
            ch.write(Value::Int(i)).unwrap();
        }
        // Let the readers drain, then close to stop them.
        while !ch.is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        ch.close();

        let mut all: Vec<i64> = readers
            .into_iter()
            .flat_map(|r| r.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }
}
