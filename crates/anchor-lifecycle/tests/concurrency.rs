use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use anchor_lifecycle::{
    CloudAnchorManager, HostResolveController, HostingError, ManagerConfig, ModeKind, NoopEvents,
    SimulatedPlatform, TrackingState,
};

/// Polls until told to stop, the way a render thread would.
fn spawn_frame_loop<F>(stop: Arc<AtomicBool>, mut frame: F) -> thread::JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    thread::spawn(move || {
        while !stop.load(Ordering::Acquire) {
            frame();
            thread::yield_now();
        }
    })
}

#[test_timeout::timeout(30)]
fn concurrent_operations_report_once_or_cancel_silently() {
    const THREADS: usize = 4;
    const OPS_PER_THREAD: usize = 50;

    let platform = Arc::new(SimulatedPlatform::with_auto_complete(1));
    let manager = Arc::new(CloudAnchorManager::with_defaults(platform.clone()));
    let stop = Arc::new(AtomicBool::new(false));
    let poller = {
        let platform = platform.clone();
        let manager = manager.clone();
        spawn_frame_loop(stop.clone(), move || {
            platform.advance_tick();
            manager.poll_completions();
        })
    };

    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|thread_id| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut counters = Vec::with_capacity(OPS_PER_THREAD);
                let mut cancelled = 0;
                for op in 0..OPS_PER_THREAD {
                    let counter = Arc::new(AtomicUsize::new(0));
                    let hits = counter.clone();
                    let token = manager
                        .resolve_str(&format!("ua-{thread_id}-{op}"), move |_| {
                            hits.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    if op % 3 == 0 && manager.cancel(token) {
                        cancelled += 1;
                        counters.push((counter, true));
                    } else {
                        counters.push((counter, false));
                    }
                }
                (counters, cancelled)
            })
        })
        .collect();

    let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    while manager.pending_count() > 0 {
        thread::yield_now();
    }
    // Joining the poller waits out listeners from its last sweep.
    stop.store(true, Ordering::Release);
    poller.join().unwrap();
    manager.poll_completions();

    let mut fired = 0;
    let mut cancelled_total = 0;
    for (counters, cancelled) in results {
        cancelled_total += cancelled;
        for (counter, was_cancelled) in counters {
            let hits = counter.load(Ordering::SeqCst);
            if was_cancelled {
                assert_eq!(hits, 0, "cancelled listener fired");
            } else {
                assert_eq!(hits, 1, "listener must fire exactly once");
            }
            fired += hits;
        }
    }
    assert_eq!(fired + cancelled_total, THREADS * OPS_PER_THREAD);
    assert_eq!(platform.live_cloud_anchor_count(), 0);
}

#[test_timeout::timeout(30)]
fn racing_host_registrations_admit_exactly_one() {
    const THREADS: usize = 8;

    let platform = Arc::new(SimulatedPlatform::new());
    let controller = Arc::new(
        HostResolveController::new(
            platform.clone(),
            ManagerConfig::default(),
            Arc::new(NoopEvents),
        )
        .unwrap(),
    );
    controller.on_host_button_press();
    let local = platform.create_local_anchor(TrackingState::Tracking);

    let barrier = Arc::new(Barrier::new(THREADS));
    let accepted = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let controller = controller.clone();
            let barrier = barrier.clone();
            let accepted = accepted.clone();
            thread::spawn(move || {
                barrier.wait();
                match controller.register_local_anchor_as_cloud_anchor(local) {
                    Ok(()) => {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(HostingError::NotAllowed { mode }) => assert_eq!(mode, ModeKind::Hosting),
                    Err(other) => panic!("unexpected hosting error: {other}"),
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert!(!controller.allow_hosting_anchor());
    assert_eq!(platform.live_cloud_anchor_count(), 1);
}

#[test_timeout::timeout(30)]
fn ui_intents_interleaved_with_frames_keep_hosting_exclusive() {
    const ROUNDS: usize = 200;

    let platform = Arc::new(SimulatedPlatform::with_auto_complete(1));
    let controller = Arc::new(HostResolveController::with_defaults(platform.clone()));
    let local = platform.create_local_anchor(TrackingState::Tracking);
    let stop = Arc::new(AtomicBool::new(false));
    let frames = {
        let platform = platform.clone();
        let controller = controller.clone();
        spawn_frame_loop(stop.clone(), move || {
            platform.advance_tick();
            controller.on_update();
        })
    };

    let mut hosted = 0;
    for _ in 0..ROUNDS {
        controller.on_host_button_press();
        match controller.register_local_anchor_as_cloud_anchor(local) {
            Ok(()) => hosted += 1,
            Err(HostingError::NotAllowed { .. }) => {}
            Err(other) => panic!("unexpected hosting error: {other}"),
        }
        assert!(!controller.allow_hosting_anchor());
        controller.on_host_button_press();
        assert_eq!(controller.mode_kind(), ModeKind::None);
    }
    stop.store(true, Ordering::Release);
    frames.join().unwrap();

    assert_eq!(hosted, ROUNDS);
    assert_eq!(controller.tracked_anchor(), None);
    assert_eq!(platform.live_cloud_anchor_count(), 0);
}
