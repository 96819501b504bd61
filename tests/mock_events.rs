use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use virt_events::{
    mock::{MockOp, MockTransport},
    transport::{RawPayload, SessionId},
    types::{
        AgentLifecycleReason, AgentLifecycleState, BlockJobStatus, BlockJobType,
        ConnectionCloseReason, DefinedDetail, DomainEvent, DomainEventDetail, DomainEventType,
        DomainHandle, EventKind, IoErrorAction, PmSuspendReason, PmWakeupReason, StartedDetail,
        StoppedDetail,
    },
    AgentLifecycleListener, BlockJobListener, Connection, ConnectionCloseListener, Domain, Error,
    ErrorKind, EventLoop, IoErrorListener, LifecycleListener, PmSuspendListener,
    PmWakeupListener, RebootListener,
};

struct Harness {
    lp: EventLoop,
    mock: Arc<MockTransport>,
    conn: Connection,
}

impl Harness {
    fn new() -> Self {
        let lp = EventLoop::new();
        lp.init().expect("init");
        let mock = MockTransport::new(lp.dispatch_queue().expect("dispatch queue"));
        let conn = Connection::open(mock.clone(), "test:///default").expect("open");
        Self { lp, mock, conn }
    }

    fn session(&self) -> SessionId {
        self.conn.session_id()
    }

    /// Dispatch exactly `n` queued deliveries.
    fn pump(&self, n: usize) {
        for _ in 0..n {
            self.lp.process_event().expect("process_event");
        }
    }
}

fn recording_lifecycle_listener() -> (Arc<dyn LifecycleListener>, Arc<Mutex<Vec<(String, DomainEvent)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: Arc<dyn LifecycleListener> = Arc::new(move |domain: &Domain, event: DomainEvent| {
        sink.lock().push((domain.name().to_string(), event));
    });
    (listener, seen)
}

#[test]
fn lifecycle_events_arrive_decoded_and_in_order() {
    let h = Harness::new();
    let (listener, seen) = recording_lifecycle_listener();
    h.conn.add_lifecycle_listener(listener).expect("add");

    let vm = DomainHandle::new("vm1");
    for (event, detail) in [(0, 0), (2, 0), (5, 0)] {
        assert_eq!(h.mock.emit_lifecycle(h.session(), &vm, event, detail).expect("emit"), 1);
    }
    h.pump(3);

    let seen = seen.lock();
    let events: Vec<_> = seen.iter().map(|(_, e)| (e.kind(), e.detail())).collect();
    assert_eq!(
        events,
        vec![
            (DomainEventType::Defined, DomainEventDetail::Defined(DefinedDetail::Added)),
            (DomainEventType::Started, DomainEventDetail::Started(StartedDetail::Booted)),
            (DomainEventType::Stopped, DomainEventDetail::Stopped(StoppedDetail::Shutdown)),
        ]
    );
    assert!(seen.iter().all(|(name, _)| name == "vm1"));
}

#[test]
fn out_of_range_codes_saturate_instead_of_failing() {
    let h = Harness::new();
    let (listener, seen) = recording_lifecycle_listener();
    h.conn.add_lifecycle_listener(listener).expect("add");

    let vm = DomainHandle::new("vm1");
    h.mock.emit_lifecycle(h.session(), &vm, 2, 99).expect("emit");
    h.mock.emit_lifecycle(h.session(), &vm, 42, 1).expect("emit");
    h.pump(2);

    let seen = seen.lock();
    assert_eq!(
        seen[0].1.detail(),
        DomainEventDetail::Started(StartedDetail::Unknown)
    );
    assert_eq!(seen[1].1.kind(), DomainEventType::Unknown);
    assert_eq!(seen[1].1.detail(), DomainEventDetail::Unknown(1));
}

#[test]
fn adding_the_same_listener_twice_subscribes_once() {
    let h = Harness::new();
    let (listener, seen) = recording_lifecycle_listener();

    h.conn.add_lifecycle_listener(listener.clone()).expect("first add");
    h.conn.add_lifecycle_listener(listener).expect("second add");

    assert_eq!(h.mock.calls(MockOp::RegisterEvent), 1);
    assert_eq!(h.mock.subscriptions(h.session()).len(), 1);
    assert_eq!(h.conn.listener_count(EventKind::Lifecycle), 1);

    let vm = DomainHandle::new("vm1");
    h.mock.emit_lifecycle(h.session(), &vm, 4, 0).expect("emit");
    h.pump(1);
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn distinct_listeners_each_get_their_own_subscription() {
    let h = Harness::new();
    let (first, first_seen) = recording_lifecycle_listener();
    let (second, second_seen) = recording_lifecycle_listener();

    h.conn.add_lifecycle_listener(first).expect("add first");
    h.conn.add_lifecycle_listener(second).expect("add second");
    assert_eq!(h.conn.listener_count(EventKind::Lifecycle), 2);

    let vm = DomainHandle::new("vm1");
    assert_eq!(h.mock.emit_lifecycle(h.session(), &vm, 3, 0).expect("emit"), 2);
    h.pump(2);

    assert_eq!(first_seen.lock().len(), 1);
    assert_eq!(second_seen.lock().len(), 1);
}

#[test]
fn removed_listener_sees_nothing_even_if_already_queued() {
    let h = Harness::new();
    let (listener, seen) = recording_lifecycle_listener();
    h.conn.add_lifecycle_listener(listener.clone()).expect("add");

    let vm = DomainHandle::new("vm1");
    h.mock.emit_lifecycle(h.session(), &vm, 2, 0).expect("emit");
    h.conn.remove_lifecycle_listener(&listener).expect("remove");

    // The delivery was queued before removal; dispatching it must not reach
    // the listener.
    h.pump(1);
    assert!(seen.lock().is_empty());

    assert_eq!(h.mock.emit_lifecycle(h.session(), &vm, 2, 0).expect("emit"), 0);
    assert!(h.mock.subscriptions(h.session()).is_empty());
    assert_eq!(h.conn.listener_count(EventKind::Lifecycle), 0);

    // Removing again is a no-op.
    h.conn.remove_lifecycle_listener(&listener).expect("second remove");
    assert_eq!(h.mock.calls(MockOp::DeregisterEvent), 1);
}

#[derive(Default)]
struct PowerWatcher {
    suspends: AtomicUsize,
    wakeups: AtomicUsize,
}

impl PmSuspendListener for PowerWatcher {
    fn on_pm_suspend(&self, _domain: &Domain, reason: PmSuspendReason) {
        assert_eq!(reason, PmSuspendReason::Unknown);
        self.suspends.fetch_add(1, Ordering::SeqCst);
    }
}

impl PmWakeupListener for PowerWatcher {
    fn on_pm_wakeup(&self, _domain: &Domain, reason: PmWakeupReason) {
        assert_eq!(reason, PmWakeupReason::Unknown);
        self.wakeups.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn removing_pm_suspend_listener_leaves_pm_wakeup_alone() {
    let h = Harness::new();
    let watcher = Arc::new(PowerWatcher::default());
    let as_suspend: Arc<dyn PmSuspendListener> = watcher.clone();
    let as_wakeup: Arc<dyn PmWakeupListener> = watcher.clone();

    h.conn.add_pm_suspend_listener(as_suspend.clone()).expect("add suspend");
    h.conn.add_pm_wakeup_listener(as_wakeup).expect("add wakeup");
    assert_eq!(h.mock.subscriptions(h.session()).len(), 2);

    h.conn.remove_pm_suspend_listener(&as_suspend).expect("remove suspend");

    assert_eq!(h.conn.listener_count(EventKind::PmSuspend), 0);
    assert_eq!(h.conn.listener_count(EventKind::PmWakeup), 1);
    let remaining = h.mock.subscriptions(h.session());
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].kind, EventKind::PmWakeup);

    let vm = DomainHandle::new("vm1");
    let change = RawPayload::PmChange { reason: 0 };
    assert_eq!(
        h.mock
            .emit(h.session(), EventKind::PmSuspend, &vm, change.clone())
            .expect("emit suspend"),
        0
    );
    assert_eq!(
        h.mock
            .emit(h.session(), EventKind::PmWakeup, &vm, change)
            .expect("emit wakeup"),
        1
    );
    h.pump(1);

    assert_eq!(watcher.suspends.load(Ordering::SeqCst), 0);
    assert_eq!(watcher.wakeups.load(Ordering::SeqCst), 1);
}

#[test]
fn block_job_listener_is_called_once_per_delivery() {
    let h = Harness::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: Arc<dyn BlockJobListener> = Arc::new(
        move |_d: &Domain, disk: &str, job: BlockJobType, status: BlockJobStatus| {
            sink.lock().push((disk.to_string(), job, status));
        },
    );
    h.conn.add_block_job_listener(listener).expect("add");

    let vm = DomainHandle::new("vm1");
    h.mock
        .emit_block_job(h.session(), &vm, "vda", 2, 3)
        .expect("emit ready");
    h.mock
        .emit_block_job(h.session(), &vm, "vdb", 1, 0)
        .expect("emit completed");
    h.pump(2);

    assert_eq!(
        *seen.lock(),
        vec![
            ("vda".to_string(), BlockJobType::Copy, BlockJobStatus::Ready),
            ("vdb".to_string(), BlockJobType::Pull, BlockJobStatus::Completed),
        ]
    );
}

#[test]
fn domain_scoped_listener_only_sees_its_domain() {
    let h = Harness::new();
    let reboots = Arc::new(AtomicUsize::new(0));
    let counter = reboots.clone();
    let listener: Arc<dyn RebootListener> = Arc::new(move |domain: &Domain| {
        assert_eq!(domain.name(), "vm1");
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let vm1 = h.conn.domain(DomainHandle::new("vm1"));
    vm1.add_reboot_listener(listener.clone()).expect("add");
    assert_eq!(
        h.mock.subscriptions(h.session())[0].domain,
        Some(DomainHandle::new("vm1"))
    );

    assert_eq!(
        h.mock
            .emit_reboot(h.session(), &DomainHandle::new("vm2"))
            .expect("emit vm2"),
        0
    );
    assert_eq!(h.mock.emit_reboot(h.session(), vm1.handle()).expect("emit vm1"), 1);
    h.pump(1);
    assert_eq!(reboots.load(Ordering::SeqCst), 1);

    h.conn.remove_reboot_listener(&listener).expect("remove");
    assert!(h.mock.subscriptions(h.session()).is_empty());
}

#[test]
fn io_error_and_agent_payloads_are_decoded() {
    let h = Harness::new();
    let io_seen = Arc::new(Mutex::new(Vec::new()));
    let agent_seen = Arc::new(Mutex::new(Vec::new()));

    let sink = io_seen.clone();
    let io: Arc<dyn IoErrorListener> = Arc::new(
        move |_d: &Domain, src: &str, alias: &str, action: IoErrorAction| {
            sink.lock().push((src.to_string(), alias.to_string(), action));
        },
    );
    let sink = agent_seen.clone();
    let agent: Arc<dyn AgentLifecycleListener> = Arc::new(
        move |_d: &Domain, state: AgentLifecycleState, reason: AgentLifecycleReason| {
            sink.lock().push((state, reason));
        },
    );
    h.conn.add_io_error_listener(io).expect("add io");
    h.conn.add_agent_lifecycle_listener(agent).expect("add agent");

    let vm = DomainHandle::new("vm1");
    h.mock
        .emit(
            h.session(),
            EventKind::IoError,
            &vm,
            RawPayload::IoError {
                src_path: "/var/lib/images/vm1.qcow2".to_string(),
                dev_alias: "virtio-disk0".to_string(),
                action: 1,
            },
        )
        .expect("emit io");
    h.mock
        .emit(
            h.session(),
            EventKind::AgentLifecycle,
            &vm,
            RawPayload::AgentLifecycle { state: 1, reason: 7 },
        )
        .expect("emit agent");
    h.pump(2);

    assert_eq!(
        *io_seen.lock(),
        vec![(
            "/var/lib/images/vm1.qcow2".to_string(),
            "virtio-disk0".to_string(),
            IoErrorAction::Pause
        )]
    );
    assert_eq!(
        *agent_seen.lock(),
        vec![(AgentLifecycleState::Connected, AgentLifecycleReason::Unknown)]
    );
}

#[test]
fn mismatched_payload_is_dropped() {
    let h = Harness::new();
    let (listener, seen) = recording_lifecycle_listener();
    h.conn.add_lifecycle_listener(listener).expect("add");

    let vm = DomainHandle::new("vm1");
    h.mock
        .emit(h.session(), EventKind::Lifecycle, &vm, RawPayload::Generic)
        .expect("emit");
    h.pump(1);
    assert!(seen.lock().is_empty());
}

#[test]
fn transport_failures_leave_registrations_unchanged() {
    let h = Harness::new();
    let (listener, _seen) = recording_lifecycle_listener();

    h.mock.fail_next(MockOp::RegisterEvent, "daemon said no");
    let err = h.conn.add_lifecycle_listener(listener.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(h.conn.listener_count(EventKind::Lifecycle), 0);

    h.conn.add_lifecycle_listener(listener.clone()).expect("retry add");
    assert_eq!(h.conn.listener_count(EventKind::Lifecycle), 1);

    h.mock.fail_next(MockOp::DeregisterEvent, "daemon said no");
    let err = h.conn.remove_lifecycle_listener(&listener).unwrap_err();
    assert!(matches!(err, Error::Transport { operation: "deregister_event_callback", .. }));
    assert_eq!(h.conn.listener_count(EventKind::Lifecycle), 1);
    assert_eq!(h.mock.subscriptions(h.session()).len(), 1);

    h.conn.remove_lifecycle_listener(&listener).expect("retry remove");
    assert_eq!(h.conn.listener_count(EventKind::Lifecycle), 0);
}

#[test]
fn listener_panic_surfaces_as_listener_fault() {
    let h = Harness::new();
    let listener: Arc<dyn LifecycleListener> = Arc::new(|_d: &Domain, _e: DomainEvent| {
        panic!("listener exploded");
    });
    h.conn.add_lifecycle_listener(listener).expect("add");

    h.mock
        .emit_lifecycle(h.session(), &DomainHandle::new("vm1"), 0, 0)
        .expect("emit");
    let err = h.lp.process_event().unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(
        &err,
        Error::ListenerFault { listener: "lifecycle", message } if message == "listener exploded"
    ));
}

fn recording_close_listener() -> (Arc<dyn ConnectionCloseListener>, Arc<Mutex<Vec<ConnectionCloseReason>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: Arc<dyn ConnectionCloseListener> =
        Arc::new(move |_c: &Connection, reason: ConnectionCloseReason| {
            sink.lock().push(reason);
        });
    (listener, seen)
}

#[test]
fn second_close_listener_replaces_the_first() {
    let h = Harness::new();
    let (a, a_seen) = recording_close_listener();
    let (b, b_seen) = recording_close_listener();

    h.conn.register_close_listener(a).expect("register a");
    h.conn.register_close_listener(b).expect("register b");
    assert_eq!(h.mock.calls(MockOp::UnregisterClose), 1);
    assert!(h.mock.has_close_callback(h.session()));

    h.conn.close().expect("close");
    h.pump(1);

    assert!(a_seen.lock().is_empty());
    assert_eq!(*b_seen.lock(), vec![ConnectionCloseReason::Client]);
}

#[test]
fn daemon_side_close_reports_its_reason() {
    let h = Harness::new();
    let (listener, seen) = recording_close_listener();
    h.conn.register_close_listener(listener).expect("register");

    h.mock
        .drop_session(h.session(), ConnectionCloseReason::Keepalive)
        .expect("drop session");
    h.pump(1);

    assert_eq!(*seen.lock(), vec![ConnectionCloseReason::Keepalive]);
}

#[test]
fn daemon_side_close_marks_the_connection_closed() {
    let h = Harness::new();
    let (close, seen) = recording_close_listener();
    let (lifecycle, _) = recording_lifecycle_listener();
    h.conn.register_close_listener(close).expect("register");
    h.conn.add_lifecycle_listener(lifecycle.clone()).expect("add");

    h.mock
        .drop_session(h.session(), ConnectionCloseReason::Eof)
        .expect("drop session");
    assert!(!h.conn.is_closed(), "nothing happens before the loop runs");
    h.pump(1);

    assert_eq!(*seen.lock(), vec![ConnectionCloseReason::Eof]);
    assert!(h.conn.is_closed());
    assert_eq!(h.conn.listener_count(EventKind::Lifecycle), 0);

    h.conn.close().expect("close after daemon-side end");
    assert_eq!(h.mock.calls(MockOp::CloseSession), 0);

    let (other, _) = recording_lifecycle_listener();
    assert!(matches!(
        h.conn.add_lifecycle_listener(other),
        Err(Error::ConnectionClosed)
    ));
    h.conn.remove_lifecycle_listener(&lifecycle).expect("remove is a no-op");
    h.conn.unregister_close_listener().expect("unregister is a no-op");
    assert_eq!(h.mock.calls(MockOp::DeregisterEvent), 0);
    assert_eq!(h.mock.calls(MockOp::UnregisterClose), 0);
}

#[test]
fn close_notice_survives_dropping_the_connection() {
    let Harness { lp, mock, conn } = Harness::new();
    let session = conn.session_id();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: Arc<dyn ConnectionCloseListener> =
        Arc::new(move |c: &Connection, reason: ConnectionCloseReason| {
            sink.lock().push((c.uri().to_string(), c.is_closed(), reason));
        });
    conn.register_close_listener(listener).expect("register");

    conn.close().expect("close");
    drop(conn);
    assert!(!mock.is_open(session));

    lp.process_event().expect("dispatch close notice");
    assert_eq!(
        *seen.lock(),
        vec![("test:///default".to_string(), true, ConnectionCloseReason::Client)]
    );
}

#[test]
fn failed_close_does_not_pin_the_connection() {
    let Harness { lp, mock, conn } = Harness::new();
    let session = conn.session_id();
    let (listener, seen) = recording_close_listener();
    conn.register_close_listener(listener).expect("register");

    mock.fail_next(MockOp::CloseSession, "daemon unreachable");
    let err = conn.close().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(conn.is_closed());

    // The session is still open at the daemon; a later end reaches nobody
    // because the connection is gone.
    drop(conn);
    mock.drop_session(session, ConnectionCloseReason::Error)
        .expect("drop session");
    lp.process_event().expect("dispatch");
    assert!(seen.lock().is_empty());
}

#[test]
fn unregistered_close_listener_is_not_called() {
    let h = Harness::new();
    let (listener, seen) = recording_close_listener();
    h.conn.register_close_listener(listener).expect("register");

    h.conn.unregister_close_listener().expect("unregister");
    h.conn.unregister_close_listener().expect("unregister twice");
    assert_eq!(h.mock.calls(MockOp::UnregisterClose), 1);
    assert!(!h.mock.has_close_callback(h.session()));

    h.conn.close().expect("close");
    assert!(seen.lock().is_empty());
}

#[test]
fn close_cancels_every_subscription() {
    let h = Harness::new();
    let (lifecycle, _) = recording_lifecycle_listener();
    let reboot: Arc<dyn RebootListener> = Arc::new(|_d: &Domain| {});
    let watcher: Arc<dyn PmWakeupListener> = Arc::new(PowerWatcher::default());

    h.conn.add_lifecycle_listener(lifecycle).expect("add lifecycle");
    h.conn.add_reboot_listener(reboot).expect("add reboot");
    h.conn.add_pm_wakeup_listener(watcher).expect("add wakeup");

    let session = h.session();
    h.conn.close().expect("close");

    assert!(h.conn.is_closed());
    assert!(!h.mock.is_open(session));
    assert_eq!(h.mock.calls(MockOp::DeregisterEvent), 3);
    assert_eq!(h.mock.calls(MockOp::CloseSession), 1);
    for kind in [EventKind::Lifecycle, EventKind::Reboot, EventKind::PmWakeup] {
        assert_eq!(h.conn.listener_count(kind), 0);
    }

    h.conn.close().expect("second close");
    assert_eq!(h.mock.calls(MockOp::CloseSession), 1);
}

#[test]
fn closed_connection_rejects_new_listeners() {
    let h = Harness::new();
    h.conn.close().expect("close");

    let (listener, _) = recording_lifecycle_listener();
    let err = h.conn.add_lifecycle_listener(listener.clone()).unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
    assert_eq!(err.kind(), ErrorKind::OrderingViolation);

    let (close, _) = recording_close_listener();
    assert!(matches!(
        h.conn.register_close_listener(close),
        Err(Error::ConnectionClosed)
    ));

    h.conn.remove_lifecycle_listener(&listener).expect("remove is a no-op");
    h.conn.unregister_close_listener().expect("unregister is a no-op");
}

#[test]
fn dropping_the_last_handle_closes_the_session() {
    let lp = EventLoop::new();
    lp.init().expect("init");
    let mock = MockTransport::new(lp.dispatch_queue().expect("dispatch queue"));

    let conn = Connection::builder(mock.clone(), "test:///default")
        .read_only(true)
        .open()
        .expect("open");
    assert!(conn.is_read_only());
    let session = conn.session_id();
    let domain = conn.domain(DomainHandle::new("vm1"));

    drop(conn);
    assert!(mock.is_open(session), "domain handle keeps the session open");
    assert_eq!(domain.connection().uri(), "test:///default");

    drop(domain);
    assert!(!mock.is_open(session));
}

#[test]
fn empty_uri_is_rejected() {
    let lp = EventLoop::new();
    lp.init().expect("init");
    let mock = MockTransport::new(lp.dispatch_queue().expect("dispatch queue"));

    let err = Connection::open(mock.clone(), "").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(mock.calls(MockOp::OpenSession), 0);
}
