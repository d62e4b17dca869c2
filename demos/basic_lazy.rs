use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use relazy::ResettableLazy;

fn main() {
   let produced = Arc::new(AtomicUsize::new(0));
   let data = Arc::new(ResettableLazy::<String, &str>::with_disposer(
      {
         let produced = Arc::clone(&produced);
         move || {
            // This closure runs only once per realization cycle
            let generation = produced.fetch_add(1, Ordering::Relaxed);
            println!("Producing data (generation {generation})...");
            // Simulate work
            std::thread::sleep(std::time::Duration::from_millis(50));
            Ok(format!("Expensive data #{generation}"))
         }
      },
      |value: &String| {
         println!("Disposing of {value:?}");
         Ok(())
      },
   ));

   let threads: Vec<_> = (0..5)
      .map(|_| {
         let data = Arc::clone(&data);
         std::thread::spawn(move || {
            println!("Thread access: {}", data.get().unwrap());
         })
      })
      .collect();

   for t in threads {
      t.join().unwrap();
   }

   assert_eq!(produced.load(Ordering::Relaxed), 1); // Producer ran only once

   // Reset releases the cached value (running the disposer) and the next
   // access recomputes from scratch.
   data.reset().unwrap();
   println!("After reset: {}", data.get().unwrap());
   assert_eq!(produced.load(Ordering::Relaxed), 2);
}
