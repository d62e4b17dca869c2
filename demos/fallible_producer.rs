use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use relazy::ResettableLazy;

fn main() {
   let should_fail = Arc::new(AtomicBool::new(true));
   let data = ResettableLazy::<String, &str>::new({
      let should_fail = Arc::clone(&should_fail);
      move || {
         println!(
            "Attempting realization (fail={})...",
            should_fail.load(Ordering::Relaxed)
         );
         if should_fail.load(Ordering::Relaxed) {
            Err("Realization failed!")
         } else {
            Ok("Successfully realized".to_string())
         }
      }
   });

   // First attempt fails, and the failure itself is cached
   match data.get() {
      Ok(_) => panic!("Should have failed"),
      Err(e) => println!("Caught error: {e}"),
   }
   assert!(data.is_realized()); // Realized with a failure

   // Fixing the underlying condition changes nothing until a reset: the
   // cached failure keeps being re-raised without re-running the producer.
   should_fail.store(false, Ordering::Relaxed);
   match data.get() {
      Ok(_) => panic!("Failure should still be cached"),
      Err(e) => println!("Still cached: {e}"),
   }

   // Reset clears the failure; the next access retries the producer
   data.reset().unwrap();
   match data.get() {
      Ok(value) => println!("Got data: {value}"),
      Err(_) => panic!("Should have succeeded"),
   }
   assert_eq!(data.get().unwrap(), "Successfully realized");
}
