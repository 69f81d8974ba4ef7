use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use libuplink::link::{ConnectStart, LinkConfig, LinkDriver, LinkEventSink, LinkState, LinkSupervisor};

/// What the driver should do with the next connect request.
#[derive(Clone, Copy)]
enum Script {
    /// Accept and report success through the sink.
    ResultOk,
    /// Accept and report failure through the sink.
    ResultFail,
    /// Accept but never deliver a result (supervisor times out).
    NoResult,
    /// Report the link as already connected.
    Already,
    /// Reject the request itself.
    RequestErr,
}

struct MockDriver {
    up_after: usize,
    up_polls: Arc<AtomicUsize>,
    sink: Option<LinkEventSink>,
    script: Mutex<VecDeque<Script>>,
    requests: Arc<AtomicUsize>,
}

impl MockDriver {
    fn new(script: Vec<Script>) -> (Self, Arc<AtomicUsize>) {
        let requests = Arc::new(AtomicUsize::new(0));
        (
            Self {
                up_after: 0,
                up_polls: Arc::new(AtomicUsize::new(0)),
                sink: None,
                script: Mutex::new(script.into()),
                requests: Arc::clone(&requests),
            },
            requests,
        )
    }
}

impl LinkDriver for MockDriver {
    type Error = ();

    fn is_up(&mut self) -> bool {
        self.up_polls.fetch_add(1, Ordering::SeqCst) >= self.up_after
    }

    fn register_events(&mut self, sink: LinkEventSink) {
        self.sink = Some(sink);
    }

    fn request_connect(&mut self, _config: &LinkConfig) -> Result<ConnectStart, Self::Error> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let sink = self.sink.as_ref().expect("driver not initialized");
        match self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::ResultOk)
        {
            Script::ResultOk => {
                // Delivered before the supervisor waits; the semaphore
                // latches the give, so this stays deterministic.
                sink.connect_result(true);
                Ok(ConnectStart::Requested)
            }
            Script::ResultFail => {
                sink.connect_result(false);
                Ok(ConnectStart::Requested)
            }
            Script::NoResult => Ok(ConnectStart::Requested),
            Script::Already => Ok(ConnectStart::AlreadyConnected),
            Script::RequestErr => Err(()),
        }
    }
}

fn fast_config() -> LinkConfig {
    let mut config = LinkConfig::new("workshop", "lab-psk");
    config.connect_timeout_ms = 20;
    config.retry_backoff_ms = 5;
    config
}

fn supervisor(script: Vec<Script>) -> (LinkSupervisor<MockDriver>, Arc<AtomicUsize>) {
    let (driver, requests) = MockDriver::new(script);
    let mut supervisor = LinkSupervisor::new(driver, fast_config());
    supervisor.initialize();
    (supervisor, requests)
}

#[test]
fn connect_succeeds_on_first_result() {
    let (mut link, requests) = supervisor(vec![Script::ResultOk]);

    link.connect();

    assert!(link.is_connected());
    assert_eq!(link.state(), LinkState::Connected);
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[test]
fn connect_retries_after_timeout() {
    let (mut link, requests) = supervisor(vec![Script::NoResult, Script::ResultOk]);

    link.connect();

    assert!(link.is_connected());
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[test]
fn connect_retries_after_negative_result() {
    let (mut link, requests) = supervisor(vec![Script::ResultFail, Script::ResultFail, Script::ResultOk]);

    link.connect();

    assert!(link.is_connected());
    assert_eq!(requests.load(Ordering::SeqCst), 3);
}

#[test]
fn connect_retries_after_request_error() {
    let (mut link, requests) = supervisor(vec![Script::RequestErr, Script::ResultOk]);

    link.connect();

    assert!(link.is_connected());
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[test]
fn already_connected_counts_as_success() {
    let (mut link, requests) = supervisor(vec![Script::Already]);

    link.connect();

    assert!(link.is_connected());
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[test]
fn sink_link_lost_reports_disconnected() {
    let sink_slot: Arc<Mutex<Option<LinkEventSink>>> = Arc::new(Mutex::new(None));

    struct SinkCapture {
        slot: Arc<Mutex<Option<LinkEventSink>>>,
    }

    impl LinkDriver for SinkCapture {
        type Error = ();

        fn is_up(&mut self) -> bool {
            true
        }

        fn register_events(&mut self, sink: LinkEventSink) {
            *self.slot.lock().unwrap() = Some(sink);
        }

        fn request_connect(&mut self, _config: &LinkConfig) -> Result<ConnectStart, Self::Error> {
            let slot = self.slot.lock().unwrap();
            slot.as_ref().unwrap().connect_result(true);
            Ok(ConnectStart::Requested)
        }
    }

    let mut link = LinkSupervisor::new(
        SinkCapture {
            slot: Arc::clone(&sink_slot),
        },
        fast_config(),
    );
    link.initialize();
    link.connect();
    assert!(link.is_connected());

    sink_slot.lock().unwrap().as_ref().unwrap().link_lost();

    assert!(!link.is_connected());
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[test]
fn initialize_polls_until_interface_is_up() {
    let (mut driver, _) = MockDriver::new(vec![]);
    driver.up_after = 2;
    let up_polls = Arc::clone(&driver.up_polls);

    let mut link = LinkSupervisor::new(driver, fast_config());
    link.initialize();

    assert!(up_polls.load(Ordering::SeqCst) >= 3);
}
