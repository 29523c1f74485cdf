use futures::executor::block_on;
use promise_core::dispatch::{Dispatcher, Inline, SerialQueue, SpawnThread, Work};
use promise_core::{Promise, Resolution};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// Holds submitted work until the test decides to run it.
#[derive(Clone, Default)]
struct Manual {
    queue: Arc<Mutex<Vec<Work>>>,
}

impl Manual {
    fn run_all(&self) -> usize {
        let work: Vec<Work> = std::mem::take(&mut *self.queue.lock().unwrap());
        let count = work.len();
        for w in work {
            w();
        }
        count
    }
}

impl Dispatcher for Manual {
    fn dispatch(&self, work: Work) {
        self.queue.lock().unwrap().push(work);
    }
}

#[test]
fn test_observers_before_and_after_fulfillment() {
    init_tracing();
    let (promise, resolver) = Promise::<i32, ()>::pair();
    let early = Arc::new(Mutex::new(vec![]));
    let late = Arc::new(Mutex::new(vec![]));

    let sink = early.clone();
    promise.on_resolve(move |v| sink.lock().unwrap().push(v), |_| panic!("rejected"));

    let producer = thread::spawn(move || resolver.fulfill(42));
    producer.join().expect("The producer thread has panicked");

    let sink = late.clone();
    promise.on_resolve(move |v| sink.lock().unwrap().push(v), |_| panic!("rejected"));
    assert_eq!(*late.lock().unwrap(), vec![42]);
    assert_eq!(*early.lock().unwrap(), vec![42]);
}

#[test]
fn test_concurrent_subscribers_each_get_one_delivery() {
    let (promise, resolver) = Promise::<i32, ()>::pair();
    let deliveries = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(9));
    let mut tasks = vec![];
    for _ in 0..8 {
        let promise = promise.clone();
        let deliveries = deliveries.clone();
        let barrier = barrier.clone();
        tasks.push(thread::spawn(move || {
            barrier.wait();
            for _ in 0..100 {
                let deliveries = deliveries.clone();
                promise.on_resolve(
                    move |v| {
                        assert_eq!(v, 7);
                        deliveries.fetch_add(1, Ordering::SeqCst);
                    },
                    |_| panic!("rejected"),
                );
            }
        }));
    }
    barrier.wait();
    resolver.fulfill(7);
    for task in tasks {
        task.join().expect("The subscriber thread has panicked");
    }
    assert_eq!(deliveries.load(Ordering::SeqCst), 800);
}

#[test]
fn test_concurrent_settlement_happens_once() {
    let (promise, resolver) = Promise::<usize, ()>::pair();
    let barrier = Arc::new(Barrier::new(8));
    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let resolver = resolver.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                resolver.fulfill(i);
            })
        })
        .collect();
    let succeeded = tasks.into_iter().filter_map(|t| t.join().ok()).count();
    assert_eq!(succeeded, 1);
    assert!(promise.is_fulfilled());
}

#[test]
fn test_then_recovers_from_rejection() {
    init_tracing();
    let parent = Promise::<i32, String>::rejected("E".into());
    let child = parent.then(
        SpawnThread,
        |v| Ok(Resolution::Value(v + 1)),
        |_| Ok(Resolution::Value(0)),
    );
    assert_eq!(block_on(child.wait()), Ok(0));
}

#[test]
fn test_then_waits_for_dispatcher() {
    let dispatcher = Manual::default();
    let parent = Promise::<i32, ()>::fulfilled(1);
    let child = parent.then(dispatcher.clone(), |v| Ok(Resolution::Value(v + 1)), |e| Err(e));
    assert!(child.is_pending());
    assert_eq!(dispatcher.run_all(), 1);
    assert_eq!(child.value(), Some(2));
}

#[test]
fn test_then_error_rejects_child() {
    let child = Promise::<i32, String>::fulfilled(1).then(
        Inline,
        |_| Err::<Resolution<i32, String>, _>("bad".into()),
        |e| Err(e),
    );
    assert_eq!(child.error(), Some("bad".to_string()));
}

#[test]
fn test_then_flattens_returned_promise() {
    let dispatcher = Manual::default();
    let (inner, inner_resolver) = Promise::<String, ()>::pair();
    let child = Promise::<i32, ()>::fulfilled(1).then(
        dispatcher.clone(),
        move |_| Ok(Resolution::Promise(inner)),
        |e| Err(e),
    );
    dispatcher.run_all();
    assert!(child.is_pending());
    inner_resolver.fulfill("flat".into());
    assert_eq!(child.value(), Some("flat".to_string()));
}

#[test]
fn test_then_runs_on_serial_queue() {
    let queue = SerialQueue::new("then-affinity").unwrap();
    let (parent, resolver) = Promise::<(), ()>::pair();
    let child = parent.then(
        queue,
        |_| Ok(Resolution::Value(thread::current().name().map(String::from))),
        |e| Err(e),
    );
    thread::spawn(move || resolver.fulfill(()))
        .join()
        .expect("The resolver thread has panicked");
    assert_eq!(block_on(async { child.await }), Ok(Some("then-affinity".to_string())));
}

#[test]
fn test_three_hop_flattening_delivers_once() {
    init_tracing();
    let (a, a_resolver) = Promise::<&'static str, ()>::pair();
    let (b, b_resolver) = Promise::<&'static str, ()>::pair();
    let (c, c_resolver) = Promise::<&'static str, ()>::pair();
    let (tx, rx) = channel();
    a.on_resolve(move |v| tx.send(v).unwrap(), |_| panic!("rejected"));

    a_resolver.resolve(Resolution::Promise(b));
    b_resolver.resolve(Resolution::Promise(c));
    assert!(!c_resolver.is_cancelled());

    thread::spawn(move || c_resolver.fulfill("done"))
        .join()
        .expect("The resolver thread has panicked");
    assert_eq!(rx.recv().unwrap(), "done");
    assert!(rx.try_recv().is_err());
    assert_eq!(a.value(), Some("done"));
}

#[test]
fn test_chained_child_keeps_parent_alive() {
    let (parent, resolver) = Promise::<i32, ()>::pair();
    let child = parent.then(Inline, |v| Ok(Resolution::Value(v * 10)), |e| Err(e));
    drop(parent);
    assert!(!resolver.is_cancelled());
    resolver.fulfill(4);
    assert_eq!(child.value(), Some(40));
}

#[test]
fn test_dropping_chain_cancels_producer() {
    let (parent, resolver) = Promise::<i32, ()>::pair();
    let child = parent.then(Inline, |v| Ok(Resolution::Value(v)), |e| Err(e));
    drop(parent);
    drop(child);
    assert!(resolver.is_cancelled());
    resolver.fulfill(1);
}

#[test]
fn test_rejection_reaches_every_callback() {
    let (promise, resolver) = Promise::<i32, String>::pair();
    let reasons = Arc::new(Mutex::new(vec![]));
    for _ in 0..3 {
        let sink = reasons.clone();
        promise.on_resolve(|_| panic!("fulfilled"), move |e| sink.lock().unwrap().push(e));
    }
    resolver.reject("down".into());
    let sink = reasons.clone();
    promise.on_resolve(|_| panic!("fulfilled"), move |e| sink.lock().unwrap().push(e));
    assert_eq!(*reasons.lock().unwrap(), vec!["down".to_string(); 4]);
}

#[test]
fn test_three_hop_rejection_delivers_once() {
    let (a, a_resolver) = Promise::<&'static str, &'static str>::pair();
    let (b, b_resolver) = Promise::<&'static str, &'static str>::pair();
    let (c, c_resolver) = Promise::<&'static str, &'static str>::pair();
    let (tx, rx) = channel();
    a.on_resolve(|_| panic!("fulfilled"), move |e| tx.send(e).unwrap());

    a_resolver.resolve(Resolution::Promise(b));
    b_resolver.resolve(Resolution::Promise(c));

    thread::spawn(move || c_resolver.reject("E"))
        .join()
        .expect("The resolver thread has panicked");
    assert_eq!(rx.recv().unwrap(), "E");
    assert!(rx.try_recv().is_err());
    assert_eq!(a.error(), Some("E"));
    assert_eq!(a.value(), None);
}

#[test]
fn test_then_adopts_returned_rejection() {
    let dispatcher = Manual::default();
    let child = Promise::<i32, String>::fulfilled(1).then(
        dispatcher.clone(),
        |_| Ok(Resolution::Promise(Promise::<i32, String>::rejected("inner".into()))),
        |e| Err(e),
    );
    assert_eq!(dispatcher.run_all(), 1);
    assert_eq!(child.error(), Some("inner".to_string()));
}
