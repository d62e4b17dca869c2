//! Internal synchronization primitives for the resettable lazy cell.
//!
//! This module provides the low-level state management used by
//! `ResettableLazy`. It implements a custom state machine using atomic
//! operations and futex-based waiting via `parking_lot_core`.
//!
//! The state is packed into a single `AtomicU32` with the following layout:
//! - Bit 0: REALIZED - A cached outcome is published
//! - Bit 1: LOCKED - Exclusive section held (realization or reset in progress)
//! - Bit 2: WAITING - At least one thread is parked on this word
//! - Bits 3-31: READERS - Count of in-flight readers of the cached outcome
//!
//! Readers register with a single CAS and never touch the futex, so reads of
//! a realized cell stay cheap. The exclusive section (taken by both the
//! realization path and `reset`) can only be entered when no readers are
//! registered, which is what makes it safe for a reset to drop the cached
//! outcome: nobody can still be looking at it.

use core::mem;
use core::sync::atomic::{AtomicU32, Ordering};

use parking_lot_core::{DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

/// Atomic state management for the lazy cell.
#[repr(transparent)]
pub(crate) struct LazyState(AtomicU32);

impl LazyState {
   /// Bit flag: A cached outcome is published.
   const REALIZED: u32 = 1;
   /// Bit flag: Exclusive section held.
   const LOCKED: u32 = 2;
   /// Bit flag: At least one thread is parked waiting for the state to move.
   const WAITING: u32 = 4;
   /// One registered reader.
   const READER: u32 = 8;
   /// Mask for the reader count bits.
   const READERS_MASK: u32 = !(Self::REALIZED | Self::LOCKED | Self::WAITING);

   /// Creates a new state representing an unrealized cell.
   #[inline]
   pub(crate) const fn new() -> Self {
      Self(AtomicU32::new(0))
   }

   /// Notifies all parked threads. Uses `parking_lot_core` futex wait/wake.
   #[inline]
   fn notify_all(&self) {
      // SAFETY: The address passed to unpark must match the address used for
      // park. We consistently use the address of the AtomicU32.
      unsafe {
         parking_lot_core::unpark_all(self.0.as_ptr() as usize, DEFAULT_UNPARK_TOKEN);
      }
   }

   /// Parks the calling thread until the state changes from `expected_state`.
   #[inline]
   fn wait(&self, expected_state: u32) {
      // SAFETY: See safety comment in `notify_all`.
      unsafe {
         // park() checks the condition closure *before* sleeping and only
         // sleeps if it returns true (state hasn't moved yet).
         let _ = parking_lot_core::park(
            self.0.as_ptr() as usize,
            || self.0.load(Ordering::Acquire) == expected_state,
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            None,
         );
         // Wake-ups may be spurious; the outer loops re-check the state.
      }
   }

   /// Checks if the REALIZED flag is set.
   #[inline]
   pub(crate) fn is_realized(&self, ordering: Ordering) -> bool {
      self.0.load(ordering) & Self::REALIZED != 0
   }

   /// Registers a reader of the cached outcome.
   ///
   /// Succeeds only while the cell is realized, the exclusive section is
   /// free, and no waiter is queued; a registered reader blocks any writer
   /// from entering until the returned guard is dropped. Never parks.
   #[inline]
   pub(crate) fn read(&self) -> Option<ReadGuard<'_>> {
      let mut current_state = self.0.load(Ordering::Acquire);
      loop {
         // Refuse while the section is held, and also once a waiter has
         // raised WAITING: a stream of overlapping readers would otherwise
         // keep the reader count nonzero forever and starve a queued reset.
         if current_state & Self::REALIZED == 0
            || current_state & (Self::LOCKED | Self::WAITING) != 0
         {
            return None;
         }
         // Acquire on success pairs with the Release publication of the
         // outcome in `WriteGuard::unlock`.
         match self.0.compare_exchange_weak(
            current_state,
            current_state + Self::READER,
            Ordering::Acquire,
            Ordering::Acquire,
         ) {
            Ok(_) => return Some(ReadGuard { state: self }),
            Err(observed) => {
               current_state = observed;
               std::hint::spin_loop();
            }
         }
      }
   }

   /// Unregisters a reader. Wakes a parked writer when the last reader leaves.
   #[inline]
   fn end_read(&self) {
      // Release so the reader's accesses happen-before the next exclusive
      // acquisition (an RMW on the same word with Acquire).
      let prev_state = self.0.fetch_sub(Self::READER, Ordering::Release);
      if prev_state & Self::WAITING != 0 && prev_state & Self::READERS_MASK == Self::READER {
         self.notify_all();
      }
   }

   /// Drops the REALIZED flag without taking the exclusive section.
   ///
   /// Only sound under `&mut` access to the owning cell (no reader or lock
   /// holder can exist). Returns `true` if the cell was realized.
   #[inline]
   pub(crate) fn set_unrealized(&self) -> bool {
      let prev_state = self.0.swap(0, Ordering::Release);
      prev_state & Self::REALIZED != 0
   }

   /// Tries to enter the exclusive section. Internal helper for the `lock*`
   /// methods.
   ///
   /// Args:
   ///   - `realize_only`: bail out early if the cell is already realized.
   ///
   /// Returns:
   ///   - `Ok(None)`: `realize_only` was set and the cell is realized and
   ///     immediately readable (section free, no waiter queued).
   ///   - `Ok(Some(guard))`: exclusive section entered.
   ///   - `Err(current_state)`: section held, readers in flight, or a waiter
   ///     already queued; the WAITING flag has been raised so a later unlock
   ///     will wake us.
   #[inline]
   fn lock_step(&self, realize_only: bool) -> Result<Option<WriteGuard<'_>>, u32> {
      loop {
         let current_state = self.0.load(Ordering::Acquire);
         if realize_only && current_state & Self::REALIZED != 0 {
            // Already realized. Bail out only when the caller can actually
            // register as a reader; while the section is held (a reset in
            // flight) or a waiter is queued, park like any other waiter
            // instead of spinning against the holder. Acquiring the lock
            // here would re-run the producer on a realized cell, so fall
            // through to the WAITING path, never to the CAS below.
            if current_state & (Self::LOCKED | Self::WAITING) == 0 {
               return Ok(None);
            }
         }
         // The exclusive section requires the lock to be free and every
         // reader to have drained.
         else if current_state & Self::LOCKED == 0 && current_state & Self::READERS_MASK == 0 {
            let new_state = current_state | Self::LOCKED;
            match self.0.compare_exchange_weak(
               current_state,
               new_state,
               Ordering::Acquire,
               Ordering::Relaxed,
            ) {
               Ok(_) => {
                  return Ok(Some(WriteGuard {
                     state: self,
                     was_realized: current_state & Self::REALIZED != 0,
                  }));
               }
               Err(_) => {
                  std::hint::spin_loop();
                  continue;
               }
            }
         }

         // Can't enter yet. Raise the WAITING flag so whoever unblocks us
         // knows to notify.
         if current_state & Self::WAITING == 0 {
            let new_state = current_state | Self::WAITING;
            match self.0.compare_exchange_weak(
               current_state,
               new_state,
               Ordering::Relaxed,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Err(new_state),
               Err(_) => {
                  std::hint::spin_loop();
                  continue;
               }
            }
         }
         return Err(current_state);
      }
   }

   /// Enters the exclusive section for first-time realization, parking if
   /// necessary.
   ///
   /// Returns `None` if the cell became realized while waiting (another
   /// thread completed the realization), `Some(guard)` otherwise.
   #[inline]
   pub(crate) fn lock_realize(&self) -> Option<WriteGuard<'_>> {
      loop {
         match self.lock_step(true) {
            Ok(guard_opt) => return guard_opt,
            Err(state_when_failed) => self.wait(state_when_failed),
         }
      }
   }

   /// Enters the exclusive section unconditionally, parking if necessary.
   /// Used by `reset`, which needs the section whether or not the cell is
   /// realized.
   #[inline]
   pub(crate) fn lock(&self) -> WriteGuard<'_> {
      loop {
         match self.lock_step(false) {
            Ok(Some(guard)) => return guard,
            // lock_step only short-circuits on REALIZED when realize_only.
            Ok(None) => unreachable!("unconditional lock observed a realize-only bailout"),
            Err(state_when_failed) => self.wait(state_when_failed),
         }
      }
   }

   /// Enters the exclusive section for realization without blocking the
   /// async executor.
   ///
   /// Tries spinning/yielding first, then falls back to `block_in_place`.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   #[inline]
   pub(crate) async fn lock_realize_async(&self) -> Option<WriteGuard<'_>> {
      #[allow(clippy::never_loop)]
      loop {
         // Spin/yield loop
         for _ in 0..16 {
            match self.lock_step(true) {
               Ok(guard_opt) => return guard_opt,
               Err(state) => {
                  // Yield so the section holder can make progress.
                  for _ in 0..32 {
                     tokio::task::yield_now().await;
                     if self.0.load(Ordering::Relaxed) != state {
                        break;
                     }
                  }
               }
            }
         }

         // Fallback to a blocking park if spin/yield didn't work.
         #[cfg(feature = "async-tokio-mt")]
         {
            return match self.lock_step(true) {
               Ok(guard_opt) => guard_opt,
               Err(state) => tokio::task::block_in_place(|| {
                  self.wait(state);
                  self.lock_realize()
               }),
            };
         }
      }
   }
}

/// RAII registration of a reader of the cached outcome.
///
/// While alive, no writer can enter the exclusive section, so the outcome
/// cannot be dropped out from under the reader.
pub(crate) struct ReadGuard<'a> {
   state: &'a LazyState,
}

impl Drop for ReadGuard<'_> {
   #[inline(always)]
   fn drop(&mut self) {
      self.state.end_read();
   }
}

/// RAII guard for the exclusive section, returned by `lock` and
/// `lock_realize`.
///
/// Consumed via [`commit_realized`](Self::commit_realized) or
/// [`commit_unrealized`](Self::commit_unrealized). If dropped instead (a
/// producer or disposer panicked), the REALIZED flag is restored to what it
/// was at acquisition: a failed realization leaves the cell unrealized and a
/// failed reset leaves the cached outcome published.
pub(crate) struct WriteGuard<'a> {
   state: &'a LazyState,
   was_realized: bool,
}

impl WriteGuard<'_> {
   /// Whether the cell held a cached outcome when the section was entered.
   #[inline(always)]
   pub(crate) fn was_realized(&self) -> bool {
      self.was_realized
   }

   /// Leaves the exclusive section with the REALIZED flag up, publishing the
   /// outcome written to the slot, and notifies waiters.
   #[inline(always)]
   pub(crate) fn commit_realized(self) {
      self.unlock(true);
      mem::forget(self);
   }

   /// Leaves the exclusive section with the REALIZED flag down (the slot must
   /// have been emptied), and notifies waiters.
   #[inline(always)]
   pub(crate) fn commit_unrealized(self) {
      self.unlock(false);
      mem::forget(self);
   }

   #[inline(always)]
   fn unlock(&self, realized: bool) {
      let new_state = if realized { LazyState::REALIZED } else { 0 };
      // Release ordering publishes the slot write (or its emptying) to the
      // Acquire loads on the read fast path and in lock_step.
      let prev_state = self.state.0.swap(new_state, Ordering::Release);
      if prev_state & LazyState::WAITING != 0 {
         self.state.notify_all();
      }
   }
}

impl Drop for WriteGuard<'_> {
   #[inline(always)]
   fn drop(&mut self) {
      self.unlock(self.was_realized);
   }
}
