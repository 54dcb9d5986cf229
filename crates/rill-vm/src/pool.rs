// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Generic slot pool with stable handles and per-object refcounts.
//!
//! Every heap object kind (scalar cells, arrays, hashes, channels,
//! functions, streams) lives in one [`Pool<T>`]: a dense 1-based slot
//! vector where each in-use slot carries a refcount and, for *shared*
//! objects, its own reentrant content lock. Free slots are chained into a
//! singly linked free list threaded through the slots themselves.
//!
//! # Locking
//!
//! - `free`: one pool-level mutex guarding the free list and growth.
//! - `slots`: an `RwLock` whose read guard pins the slot storage in place
//!   for the duration of a content operation; only growth (at allocate
//!   time) takes the write guard, so storage never relocates under a live
//!   content access.
//! - per-slot `lock`: a reentrant mutex serializing content access to
//!   SHARED slots. Ordinary slots skip it entirely; they must not be
//!   touched by more than one thread.
//!
//! Lock order is always `free` before `slots`; the per-slot lock is only
//! ever taken under a `slots` read guard and never while holding `free`.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::num::NonZeroU32;
use std::sync::atomic::{fence, AtomicU32, Ordering};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

/// Slot is live.
const FLAG_IN_USE: u32 = 0x1;
/// Slot contents may be touched from several threads; content ops take the
/// per-slot lock.
const FLAG_SHARED: u32 = 0x2;

/// Stable, typed, non-zero handle into a [`Pool<T>`].
///
/// Handle 0 is never valid; the niche lets `Option<Handle<T>>` stay one
/// word. A handle stays valid until the matching number of
/// [`Pool::release`] calls has been made.
pub struct Handle<T> {
    raw: NonZeroU32,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(|raw| Handle {
            raw,
            _kind: PhantomData,
        })
    }

    /// The raw 1-based slot number.
    pub fn raw(&self) -> u32 {
        self.raw.get()
    }

    fn index(&self) -> usize {
        self.raw.get() as usize - 1
    }
}

// Manual impls: the derives would demand `T: Copy` etc., but the handle is
// just a number regardless of `T`.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<T> Eq for Handle<T> {}
impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}
impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle(#{})", self.raw)
    }
}

struct Slot<T> {
    flags: AtomicU32,
    refs: AtomicU32,
    /// Free-list link (raw handle of the next free slot, 0 terminates).
    /// Only meaningful while the slot is free; mutated under the free
    /// mutex.
    next_free: AtomicU32,
    /// Content lock for SHARED slots. Reentrant so an explicit
    /// `lock()` + content op + `unlock()` sequence does not self-deadlock.
    lock: ReentrantMutex<()>,
    value: UnsafeCell<Option<T>>,
}

impl<T> Slot<T> {
    fn free(next: u32) -> Self {
        Slot {
            flags: AtomicU32::new(0),
            refs: AtomicU32::new(0),
            next_free: AtomicU32::new(next),
            lock: ReentrantMutex::new(()),
            value: UnsafeCell::new(None),
        }
    }

    fn in_use(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_IN_USE != 0
    }

    fn shared(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & FLAG_SHARED != 0
    }
}

struct FreeList {
    /// Raw handle of the first free slot, 0 when empty.
    head: u32,
    free_count: usize,
    live_count: usize,
}

/// Arena owning every instance of one heap object kind.
pub struct Pool<T> {
    slots: RwLock<Vec<Slot<T>>>,
    free: Mutex<FreeList>,
}

// SAFETY: Pool hands out access to T across threads, but:
// - slot metadata is atomic,
// - free-list mutation is under the `free` mutex,
// - SHARED slot contents are serialized by the per-slot lock,
// - non-SHARED slot contents are confined to one thread by contract
//   (documented on `with`/`with_mut`),
// so `T: Send` is sufficient for both.
unsafe impl<T: Send> Send for Pool<T> {}
unsafe impl<T: Send> Sync for Pool<T> {}

impl<T> Pool<T> {
    /// Create a pool with `initial` free slots already threaded onto the
    /// free list.
    pub fn new(initial: usize) -> Self {
        let initial = initial.max(1);
        let mut slots = Vec::with_capacity(initial);
        for i in 0..initial {
            // Chain slot i+1 -> i+2, last -> 0.
            let next = if i + 1 < initial { i as u32 + 2 } else { 0 };
            slots.push(Slot::free(next));
        }
        Pool {
            slots: RwLock::new(slots),
            free: Mutex::new(FreeList {
                head: 1,
                free_count: initial,
                live_count: 0,
            }),
        }
    }

    /// Allocate a slot holding `value`, refcount 1.
    ///
    /// Never returns handle 0: growth goes through Rust's infallible
    /// allocator, so the out-of-memory sentinel of the C-era contract
    /// cannot be observed from safe code.
    pub fn allocate_with(&self, shared: bool, value: T) -> Handle<T> {
        let mut fl = self.free.lock();
        let raw = if fl.head != 0 {
            let slots = self.slots.read();
            let raw = fl.head;
            fl.head = slots[raw as usize - 1].next_free.load(Ordering::Relaxed);
            fl.free_count -= 1;
            self.init_slot(&slots[raw as usize - 1], shared, value);
            raw
        } else {
            // Free list exhausted: grow geometrically and take the first
            // new slot; the rest join the free list.
            let mut slots = self.slots.write();
            let old_len = slots.len();
            let new_len = old_len.saturating_mul(2).max(old_len + 1);
            for i in old_len..new_len {
                let next = if i + 1 < new_len { i as u32 + 2 } else { 0 };
                slots.push(Slot::free(next));
            }
            let raw = old_len as u32 + 1;
            fl.head = if new_len > old_len + 1 { raw + 1 } else { 0 };
            fl.free_count += new_len - old_len - 1;
            self.init_slot(&slots[raw as usize - 1], shared, value);
            raw
        };
        fl.live_count += 1;
        Handle::from_raw(raw).expect("pool handles are 1-based")
    }

    fn init_slot(&self, slot: &Slot<T>, shared: bool, value: T) {
        // SAFETY: the slot was just unlinked from the free list (or newly
        // grown) while holding the free mutex, and its IN_USE flag is not
        // yet published, so no other thread can reach the payload.
        unsafe {
            *slot.value.get() = Some(value);
        }
        slot.refs.store(1, Ordering::Relaxed);
        let flags = FLAG_IN_USE | if shared { FLAG_SHARED } else { 0 };
        slot.flags.store(flags, Ordering::Release);
    }

    /// Allocate `n` slots with consecutive handles; returns the first.
    ///
    /// The run is carved off the tail of the slot vector so the handles
    /// are guaranteed contiguous regardless of free-list state.
    pub fn allocate_many(&self, n: usize, shared: bool, mut make: impl FnMut() -> T) -> Handle<T> {
        assert!(n > 0, "allocate_many of zero slots");
        let mut fl = self.free.lock();
        let mut slots = self.slots.write();
        let base = slots.len() as u32 + 1;
        for _ in 0..n {
            slots.push(Slot::free(0));
            let slot = slots.last().expect("just pushed");
            self.init_slot(slot, shared, make());
        }
        fl.live_count += n;
        Handle::from_raw(base).expect("pool handles are 1-based")
    }

    /// Bump the refcount; returns the same handle for chaining.
    pub fn reference(&self, handle: Handle<T>) -> Handle<T> {
        let slots = self.slots.read();
        let slot = &slots[handle.index()];
        assert!(slot.in_use(), "reference of a free pool slot");
        slot.refs.fetch_add(1, Ordering::Relaxed);
        handle
    }

    /// Drop one reference. When the count reaches zero the payload is
    /// taken out of the slot, the slot rejoins the free list, and the
    /// payload is handed back so the owner can release anything nested
    /// inside it. Releasing more times than the object was referenced is
    /// a program error and asserts.
    pub fn release(&self, handle: Handle<T>) -> Option<T> {
        let slots = self.slots.read();
        let slot = &slots[handle.index()];
        assert!(slot.in_use(), "release of a free pool slot");
        let prev = slot.refs.fetch_sub(1, Ordering::Release);
        assert!(prev >= 1, "pool refcount underflow");
        if prev != 1 {
            return None;
        }

        // Last reference gone: this thread owns the slot now.
        fence(Ordering::Acquire);
        // SAFETY: refcount hit zero, so no other thread holds this handle;
        // the slots read guard pins storage.
        let value = unsafe { (*slot.value.get()).take() };
        slot.flags.store(0, Ordering::Release);
        drop(slots);

        // Re-acquire in free -> slots order to push onto the free list.
        let mut fl = self.free.lock();
        let slots = self.slots.read();
        slots[handle.index()]
            .next_free
            .store(fl.head, Ordering::Relaxed);
        fl.head = handle.raw();
        fl.free_count += 1;
        fl.live_count -= 1;
        value
    }

    /// Run `f` against the slot contents.
    ///
    /// Takes the per-slot lock when the slot is SHARED. Non-SHARED slots
    /// are accessed without synchronization: callers must keep such
    /// objects on a single thread.
    pub fn with<R>(&self, handle: Handle<T>, f: impl FnOnce(&T) -> R) -> R {
        let slots = self.slots.read();
        let slot = &slots[handle.index()];
        assert!(slot.in_use(), "content access to a free pool slot");
        let _guard = slot.shared().then(|| slot.lock.lock());
        // SAFETY: slot is in use (payload is Some); SHARED content is
        // serialized by the guard above, non-SHARED content is
        // single-threaded by contract.
        match unsafe { (*slot.value.get()).as_ref() } {
            Some(value) => f(value),
            None => unreachable!("in-use slot without payload"),
        }
    }

    /// Mutable counterpart of [`with`](Pool::with); same locking rules.
    ///
    /// Reentrancy note: the per-slot lock is reentrant so this composes
    /// with an explicit [`lock`](Pool::lock), but nesting `with_mut` calls
    /// on the *same* handle from the same thread would alias and is
    /// forbidden.
    pub fn with_mut<R>(&self, handle: Handle<T>, f: impl FnOnce(&mut T) -> R) -> R {
        let slots = self.slots.read();
        let slot = &slots[handle.index()];
        assert!(slot.in_use(), "content access to a free pool slot");
        let _guard = slot.shared().then(|| slot.lock.lock());
        // SAFETY: as in `with`; exclusivity of the &mut comes from the
        // per-slot lock (SHARED) or single-thread ownership (ordinary),
        // and heap code never nests content ops on one handle.
        match unsafe { (*slot.value.get()).as_mut() } {
            Some(value) => f(value),
            None => unreachable!("in-use slot without payload"),
        }
    }

    /// Explicitly lock a SHARED slot across several content operations.
    /// No-op for ordinary slots. The lock is reentrant; every `lock` must
    /// be paired with exactly one [`unlock`](Pool::unlock) on the same
    /// thread.
    pub fn lock(&self, handle: Handle<T>) {
        let slots = self.slots.read();
        let slot = &slots[handle.index()];
        assert!(slot.in_use(), "lock of a free pool slot");
        if slot.shared() {
            std::mem::forget(slot.lock.lock());
        }
    }

    /// Release an explicit [`lock`](Pool::lock). No-op for ordinary slots
    /// or when the current thread does not hold the lock (logged).
    pub fn unlock(&self, handle: Handle<T>) {
        let slots = self.slots.read();
        let slot = &slots[handle.index()];
        if !slot.shared() {
            return;
        }
        if slot.lock.is_owned_by_current_thread() {
            // SAFETY: ownership just checked; this undoes the forgotten
            // guard from `lock`.
            unsafe { slot.lock.force_unlock() };
        } else {
            log::warn!("[pool] unlock of #{} by a thread that does not hold it", handle.raw());
        }
    }

    /// Current refcount of a live slot (diagnostics and tests).
    pub fn refcount(&self, handle: Handle<T>) -> u32 {
        let slots = self.slots.read();
        slots[handle.index()].refs.load(Ordering::Relaxed)
    }

    /// Whether the handle currently names an in-use slot.
    pub fn is_live(&self, handle: Handle<T>) -> bool {
        let slots = self.slots.read();
        slots
            .get(handle.index())
            .map(Slot::in_use)
            .unwrap_or(false)
    }

    /// Whether the slot was allocated shared.
    pub fn is_shared(&self, handle: Handle<T>) -> bool {
        let slots = self.slots.read();
        slots[handle.index()].shared()
    }

    /// Number of live objects.
    pub fn live(&self) -> usize {
        self.free.lock().live_count
    }

    /// Total slot capacity (live + free).
    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }
}

impl<T: Default> Pool<T> {
    /// Allocate a default-constructed object.
    pub fn allocate(&self, shared: bool) -> Handle<T> {
        self.allocate_with(shared, T::default())
    }
}
