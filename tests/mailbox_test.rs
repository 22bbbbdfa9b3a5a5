use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use relight::instance::Mailbox;

#[test]
fn concurrent_posts_are_drained_exactly_once() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 1000;
    let mailbox = Arc::new(Mailbox::new());
    let producers: Vec<_> = (0..THREADS)
        .map(|thread_index| {
            let mailbox = mailbox.clone();
            thread::spawn(move || {
                for item in 0..PER_THREAD {
                    mailbox.post(thread_index * PER_THREAD + item);
                }
            })
        })
        .collect();

    let mut drained = Vec::new();
    while producers.iter().any(|producer| !producer.is_finished()) {
        drained.extend(mailbox.drain());
    }
    for producer in producers {
        producer.join().expect("producer");
    }
    drained.extend(mailbox.drain());

    drained.sort_unstable();
    assert_eq!(drained, (0..THREADS * PER_THREAD).collect::<Vec<_>>());
    assert!(mailbox.is_empty());
}

#[test]
fn post_unless_leaves_nothing_behind_the_final_drain() {
    const POSTERS: usize = 4;
    const PER_POSTER: usize = 250;
    for _ in 0..50 {
        let mailbox = Arc::new(Mailbox::new());
        let ready = Arc::new(AtomicBool::new(false));
        let posters: Vec<_> = (0..POSTERS)
            .map(|poster| {
                let (mailbox, ready) = (mailbox.clone(), ready.clone());
                thread::spawn(move || {
                    let mut handed_back = Vec::new();
                    for item in 0..PER_POSTER {
                        let item = poster * PER_POSTER + item;
                        let posted =
                            mailbox.post_unless(item, || ready.load(Ordering::SeqCst).then_some(()));
                        if let Err((item, ())) = posted {
                            handed_back.push(item);
                        }
                    }
                    handed_back
                })
            })
            .collect();

        thread::yield_now();
        ready.store(true, Ordering::SeqCst);
        let mut seen = mailbox.drain();
        for poster in posters {
            seen.extend(poster.join().expect("poster"));
        }

        // Every item was either drained once or handed back to its poster.
        assert!(mailbox.is_empty());
        seen.sort_unstable();
        assert_eq!(seen, (0..POSTERS * PER_POSTER).collect::<Vec<_>>());
    }
}
