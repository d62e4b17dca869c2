//! Resettable lazy cell.
//!
//! This module provides the [`ResettableLazy<T, E>`] type, a thread-safe cell
//! that realizes its value on first access, caches the outcome (value or
//! failure), and can be explicitly reset so that the next access recomputes
//! from scratch. It's useful for caches of expensive resources that
//! occasionally need to be torn down and rebuilt: connections, parsed
//! configuration, memoized computations.
//!
//! The implementation uses atomic operations for the fast path (reading a
//! realized outcome) and futex-based synchronization for the slow path
//! (waiting for a realization or reset to complete).

use core::cell::UnsafeCell;
use core::fmt;
use core::mem::MaybeUninit;
use core::sync::atomic::Ordering;

use super::state::LazyState;

/// The stored zero-argument computation that realizes the value.
type Producer<T, E> = Box<dyn Fn() -> Result<T, E> + Send + Sync>;

/// The stored cleanup computation run on a realized value during reset.
type Disposer<T, E> = Box<dyn Fn(&T) -> Result<(), E> + Send + Sync>;

/// A thread-safe, resettable lazy value.
///
/// The cell owns a *producer* supplied at construction and invokes it at most
/// once per realization cycle, no matter how many threads call [`get`] at the
/// same time. The producer's outcome is cached: a success is returned to
/// every caller, and a failure is re-raised to every caller until the next
/// [`reset`]. Failures are never retried implicitly.
///
/// [`reset`] returns the cell to the unrealized state, first running the
/// optional *disposer* on a cached value (never on a cached failure), so the
/// next [`get`] invokes the producer again. Dropping the cell drops a cached
/// value but does not invoke the disposer.
///
/// Both collaborators are opaque to the cell; they run inside its exclusive
/// critical section. A producer or disposer that calls back into the same
/// cell will deadlock, as with `std::sync::OnceLock`.
///
/// [`get`]: Self::get
/// [`reset`]: Self::reset
pub struct ResettableLazy<T, E> {
   producer: Producer<T, E>,
   disposer: Option<Disposer<T, E>>,
   slot: UnsafeCell<MaybeUninit<Result<T, E>>>,
   state: LazyState,
}

impl<T, E> ResettableLazy<T, E> {
   /// Creates a new, unrealized cell with the given producer and no disposer.
   #[must_use]
   pub fn new<P>(producer: P) -> Self
   where
      P: Fn() -> Result<T, E> + Send + Sync + 'static,
   {
      Self {
         producer: Box::new(producer),
         disposer: None,
         slot: UnsafeCell::new(MaybeUninit::uninit()),
         state: LazyState::new(),
      }
   }

   /// Creates a new, unrealized cell with the given producer and disposer.
   ///
   /// The disposer borrows the value rather than consuming it: the cell only
   /// drops the value once the disposer returns `Ok`, so a failed disposal
   /// leaves the cached value in place for a retried [`reset`](Self::reset).
   #[must_use]
   pub fn with_disposer<P, D>(producer: P, disposer: D) -> Self
   where
      P: Fn() -> Result<T, E> + Send + Sync + 'static,
      D: Fn(&T) -> Result<(), E> + Send + Sync + 'static,
   {
      Self {
         producer: Box::new(producer),
         disposer: Some(Box::new(disposer)),
         slot: UnsafeCell::new(MaybeUninit::uninit()),
         state: LazyState::new(),
      }
   }

   /// Checks if the cell currently holds a cached outcome (value or failure).
   ///
   /// This method never blocks.
   #[inline]
   pub fn is_realized(&self) -> bool {
      self.state.is_realized(Ordering::Relaxed)
   }

   /// Returns the cached value, realizing it first if necessary.
   ///
   /// If the cell is already realized this is a single atomic registration
   /// and a clone, with no blocking. Otherwise the calling thread enters the
   /// exclusive critical section, re-checks, and runs the producer exactly
   /// once while concurrent callers park; all of them then observe the same
   /// outcome.
   ///
   /// A cached failure is returned (cloned) to every caller until the next
   /// [`reset`](Self::reset); the producer is not re-run for it.
   ///
   /// Callers holding values that are expensive to clone should store an
   /// `Arc<T>` in the cell.
   #[inline]
   pub fn get(&self) -> Result<T, E>
   where
      T: Clone,
      E: Clone,
   {
      self.with(|outcome| match outcome {
         Ok(value) => Ok(value.clone()),
         Err(failure) => Err(failure.clone()),
      })
   }

   /// Borrows the cached outcome, realizing it first if necessary.
   ///
   /// The closure runs under a read registration, so a concurrent
   /// [`reset`](Self::reset) waits for it to finish before disposing of the
   /// value. Prefer this over [`get`](Self::get) when cloning is unwanted.
   pub fn with<R, F>(&self, f: F) -> R
   where
      F: FnOnce(Result<&T, &E>) -> R,
   {
      loop {
         if let Some(_guard) = self.state.read() {
            // SAFETY: The read registration guarantees the outcome is
            // published and stays alive until the guard drops.
            let outcome = unsafe { self.outcome_unchecked() };
            return f(outcome.as_ref());
         }
         self.realize_slow();
      }
   }

   /// Returns the cached outcome without blocking.
   ///
   /// Returns `None` while the cell is unrealized, or while a realization or
   /// reset is in progress or queued.
   #[inline]
   pub fn try_get(&self) -> Option<Result<T, E>>
   where
      T: Clone,
      E: Clone,
   {
      let _guard = self.state.read()?;
      // SAFETY: See `with`.
      let outcome = unsafe { self.outcome_unchecked() };
      Some(match outcome {
         Ok(value) => Ok(value.clone()),
         Err(failure) => Err(failure.clone()),
      })
   }

   /// Releases the cached outcome so the next access recomputes from scratch.
   ///
   /// Mutually exclusive with realization and with other resets; waits for
   /// in-flight [`with`](Self::with) closures to finish. If the cell holds a
   /// cached value and a disposer was supplied, the disposer runs exactly
   /// once on that value before the state clears. A cached failure is cleared
   /// without invoking the disposer, and resetting an unrealized cell is a
   /// no-op.
   ///
   /// # Errors
   ///
   /// A disposer error propagates to the caller and the cell stays realized
   /// with its value intact, so the reset can be retried.
   pub fn reset(&self) -> Result<(), E> {
      let guard = self.state.lock();
      if !guard.was_realized() {
         guard.commit_unrealized();
         return Ok(());
      }

      // SAFETY: We hold the exclusive section and REALIZED was up when we
      // entered it; the flag only changes under the section.
      let outcome = unsafe { self.outcome_unchecked() };
      if let (Ok(value), Some(disposer)) = (outcome, self.disposer.as_ref()) {
         if let Err(failure) = disposer(value) {
            guard.commit_realized();
            return Err(failure);
         }
      }

      // SAFETY: We hold the exclusive section with no registered readers, so
      // nothing can observe the outcome while it is dropped. The REALIZED
      // flag goes down before the section is released.
      unsafe { (*self.slot.get()).assume_init_drop() };
      guard.commit_unrealized();
      Ok(())
   }

   /// Takes the cached outcome out of the cell, leaving it unrealized.
   ///
   /// The disposer is *not* invoked; ownership of the value (or failure)
   /// moves to the caller. Requires exclusive access (`&mut self`), so it
   /// never blocks.
   #[inline]
   pub fn take(&mut self) -> Option<Result<T, E>> {
      if self.state.set_unrealized() {
         // SAFETY: The flag was up and `&mut self` rules out readers; the
         // state is now unrealized, preventing further observation.
         Some(unsafe { (*self.slot.get()).assume_init_read() })
      } else {
         None
      }
   }

   /// Returns the cached value, realizing it first if necessary, without
   /// blocking the async executor while another task holds the critical
   /// section.
   ///
   /// The stored producer itself is synchronous and runs inline on the
   /// winning task; this method only makes the *waiting* cooperative.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub async fn get_async(&self) -> Result<T, E>
   where
      T: Clone,
      E: Clone,
   {
      loop {
         if let Some(_guard) = self.state.read() {
            // SAFETY: See `with`.
            let outcome = unsafe { self.outcome_unchecked() };
            return match outcome {
               Ok(value) => Ok(value.clone()),
               Err(failure) => Err(failure.clone()),
            };
         }
         if let Some(guard) = self.state.lock_realize_async().await {
            let outcome = (self.producer)();
            // SAFETY: We hold the exclusive section and the slot is vacant
            // while the cell is unrealized.
            unsafe { (*self.slot.get()).write(outcome) };
            guard.commit_realized();
         } else {
            // Realized but not yet readable (a reset can slip in between);
            // keep the retry loop cooperative.
            tokio::task::yield_now().await;
         }
      }
   }

   /// Cold path for `with`: enters the exclusive section and runs the
   /// producer, unless another thread realized the cell first.
   #[cold]
   fn realize_slow(&self) {
      let Some(guard) = self.state.lock_realize() else {
         return; // Another thread realized it while we waited
      };
      let outcome = (self.producer)();
      // SAFETY: We hold the exclusive section and the slot is vacant while
      // the cell is unrealized.
      unsafe { (*self.slot.get()).write(outcome) };
      guard.commit_realized(); // Publish and notify waiters
   }

   /// Returns a reference to the cached outcome without checking for it.
   ///
   /// # Safety
   ///
   /// The cell must be realized and the caller must hold either a read
   /// registration or the exclusive section for the reference's lifetime.
   unsafe fn outcome_unchecked(&self) -> &Result<T, E> {
      debug_assert!(
         self.state.is_realized(Ordering::Relaxed),
         "outcome_unchecked called on unrealized cell"
      );
      // SAFETY: The caller guarantees the slot holds a published outcome.
      unsafe { (*self.slot.get()).assume_init_ref() }
   }
}

// SAFETY:
// `&ResettableLazy<T, E>` hands out `&T`/`&E` (requiring `T: Sync`,
// `E: Sync`) and the realize/reset machinery is thread-safe. `T: Send` and
// `E: Send` are also required because an outcome produced on one thread may
// be dropped by a `reset` on another.
unsafe impl<T: Send + Sync, E: Send + Sync> Sync for ResettableLazy<T, E> {}
// SAFETY:
// `ResettableLazy<T, E>` owns its outcome, so moving the cell across threads
// moves the `T`/`E` with it. The stored callables are `Send + Sync` boxes by
// construction.
unsafe impl<T: Send, E: Send> Send for ResettableLazy<T, E> {}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for ResettableLazy<T, E> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let mut d = f.debug_tuple("ResettableLazy");
      match self.state.read() {
         Some(_guard) => {
            // SAFETY: The read registration keeps the outcome alive.
            d.field(unsafe { self.outcome_unchecked() })
         }
         None => d.field(&format_args!("<unrealized>")),
      };
      d.finish()
   }
}

impl<T, E> Drop for ResettableLazy<T, E> {
   #[inline]
   fn drop(&mut self) {
      // Destruction does not run the disposer; only an explicit reset does.
      if self.state.is_realized(Ordering::Relaxed) {
         // SAFETY: We have exclusive access, the slot holds an outcome, and
         // it won't be observed again.
         unsafe { self.slot.get_mut().assume_init_drop() };
      }
   }
}
