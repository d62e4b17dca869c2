//! A thread-safe, resettable lazy value.
//!
//! This crate provides [`ResettableLazy<T, E>`]: a cell that computes its
//! held value at most once per realization cycle, caches the outcome (value
//! *or* failure), publishes it to every concurrent observer, and supports an
//! explicit [`reset`](ResettableLazy::reset) that releases the cached value
//! (optionally running a cleanup action) so the next access recomputes from
//! scratch.
//!
//! It uses atomic operations with `parking_lot`'s futex-based synchronization
//! for efficient blocking when necessary. The producer runs exactly once per
//! cycle even when multiple threads race to realize the value.
//!
//! # Features
//!
//! - **Lock-free fast path**: Reading a realized outcome is one CAS and a
//!   clone; no futex, no blocking.
//! - **Cached failures**: A producer error is re-raised to every caller until
//!   the next reset, never retried behind the caller's back.
//! - **Explicit disposal**: Reset runs an optional disposer on the cached
//!   value before clearing it, and leaves state intact if disposal fails.
//! - **Efficient blocking**: Futex-based parking while a realization or reset
//!   is in flight.
//! - **Async support**: Feature-gated cooperative waiting on tokio runtimes.
//!
//! # Examples
//!
//! ```rust
//! use relazy::ResettableLazy;
//!
//! let config: ResettableLazy<String, String> =
//!    ResettableLazy::new(|| Ok("production".to_string()));
//!
//! // First access runs the producer; later accesses reuse the cache.
//! assert_eq!(config.get().unwrap(), "production");
//! assert!(config.is_realized());
//!
//! // Drop the cached value; the next access recomputes.
//! config.reset().unwrap();
//! assert!(!config.is_realized());
//! ```
//!
//! With a disposer that releases the value during reset:
//!
//! ```rust
//! use relazy::ResettableLazy;
//!
//! let pool: ResettableLazy<Vec<u8>, &'static str> = ResettableLazy::with_disposer(
//!    || Ok(vec![0; 64]),
//!    |buf: &Vec<u8>| {
//!       // Runs on the cached value during reset(), before it is dropped.
//!       assert_eq!(buf.len(), 64);
//!       Ok(())
//!    },
//! );
//!
//! assert!(pool.get().is_ok());
//! pool.reset().unwrap();
//! ```

/// Resettable lazy cell implementation.
mod lazy;

/// Internal synchronization state management.
mod state;

pub use lazy::ResettableLazy;
