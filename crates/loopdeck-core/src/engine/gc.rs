//! Deferred deallocation for audio buffers
//!
//! Live loop buffers are `basedrop::Shared<StereoBuffer>`. When a staging
//! swap replaces one on the audio callback, dropping the old `Shared` only
//! enqueues a pointer; the actual free happens on a background GC thread
//! where a slow `munmap` cannot cause a dropout.

use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle};

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    // The Collector is !Sync, so it lives on the thread that runs it.
    thread::Builder::new()
        .name("loopdeck-gc".to_string())
        .spawn(move || {
            let mut collector = Collector::new();
            tx.send(collector.handle()).expect("Failed to send GC handle");

            log::info!("Buffer GC thread started");
            loop {
                collector.collect();
                thread::sleep(Duration::from_millis(100));
            }
        })
        .expect("Failed to spawn GC thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Handle for allocating `Shared<T>` values whose teardown must stay off the
/// audio thread. Lightweight, clone freely.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}
