//! End-to-end scenarios over loopback TCP (spec.md §8, "End-to-end
//! scenarios").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conduit::{make_event, EventConsumer, EventListener, ListenerConfig, SocketAddress, TcpClient, TcpServer};

fn loopback() -> SocketAddress {
    SocketAddress::resolve("127.0.0.1:0").unwrap()
}

fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

/// Scenario 1: Hello.
#[test]
fn hello_event_delivers_in_order() {
    let server = Arc::new(TcpServer::bind(loopback()).unwrap());
    let addr = server.local_addr();

    let listener = EventListener::new(ListenerConfig::default());
    listener.attach_server(server).unwrap();

    let received: Arc<Mutex<Option<(String, i32)>>> = Arc::new(Mutex::new(None));
    let received2 = received.clone();

    let consumer = EventConsumer::new(listener.clone());
    consumer.bind("hello", move |_conn, ev| {
        let mut reader = conduit::PacketReader::new(&ev.packet);
        let s = reader.read_str().unwrap().to_string();
        let n: i32 = reader.read().unwrap();
        *received2.lock().unwrap() = Some((s, n));
    });

    listener.run().unwrap();
    consumer.run().unwrap();

    let client = TcpClient::connect(addr, Duration::from_secs(2)).unwrap();
    let event = make_event("hello", |p| {
        p.write_str("world");
        p.write(42i32);
    });
    client.connection().send(&event).unwrap();

    assert!(wait_until(Duration::from_secs(2), || received.lock().unwrap().is_some()));
    assert_eq!(received.lock().unwrap().take(), Some(("world".to_string(), 42)));

    client.disconnect();
    consumer.join();
    listener.join();
}

/// Scenario 2: Ordering.
#[test]
fn events_on_one_connection_arrive_in_wire_order() {
    const COUNT: i32 = 200;

    let server = Arc::new(TcpServer::bind(loopback()).unwrap());
    let addr = server.local_addr();

    let listener = EventListener::new(ListenerConfig::default());
    listener.attach_server(server).unwrap();

    let seen: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();

    let consumer = EventConsumer::new(listener.clone());
    consumer.bind("n", move |_conn, ev| {
        let mut reader = conduit::PacketReader::new(&ev.packet);
        let n: i32 = reader.read().unwrap();
        seen2.lock().unwrap().push(n);
    });

    listener.run().unwrap();
    consumer.run().unwrap();

    let client = TcpClient::connect(addr, Duration::from_secs(2)).unwrap();
    for i in 0..COUNT {
        let event = make_event("n", |p| p.write(i));
        client.connection().send(&event).unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || seen.lock().unwrap().len() as i32 == COUNT));
    let expected: Vec<i32> = (0..COUNT).collect();
    assert_eq!(*seen.lock().unwrap(), expected);

    client.disconnect();
    consumer.join();
    listener.join();
}

/// Scenario 3: Catch-all.
#[test]
fn catch_all_consumer_never_sees_bound_names() {
    let server = Arc::new(TcpServer::bind(loopback()).unwrap());
    let addr = server.local_addr();

    let listener = EventListener::new(ListenerConfig::default());
    listener.attach_server(server).unwrap();

    let foo_count = Arc::new(AtomicUsize::new(0));
    let other_seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let consumer_a = EventConsumer::new(listener.clone());
    let foo_count2 = foo_count.clone();
    consumer_a.bind("foo", move |_conn, _ev| {
        foo_count2.fetch_add(1, Ordering::SeqCst);
    });

    let consumer_b = EventConsumer::new(listener.clone());
    let other_seen2 = other_seen.clone();
    consumer_b.on_event(move |_conn, ev| {
        other_seen2.lock().unwrap().push(ev.name.clone());
    });

    listener.run().unwrap();
    consumer_a.run().unwrap();
    consumer_b.run().unwrap();

    let client = TcpClient::connect(addr, Duration::from_secs(2)).unwrap();
    for name in ["foo", "bar", "baz"] {
        client.connection().send(&make_event(name, |_| {})).unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || {
        foo_count.load(Ordering::SeqCst) == 1 && other_seen.lock().unwrap().len() == 2
    }));
    assert_eq!(foo_count.load(Ordering::SeqCst), 1);
    let mut others = other_seen.lock().unwrap().clone();
    others.sort();
    assert_eq!(others, vec!["bar".to_string(), "baz".to_string()]);

    client.disconnect();
    consumer_a.join();
    consumer_b.join();
    listener.join();
}

/// Scenario 4: Collision.
#[test]
fn two_consumers_binding_the_same_name_fails_run() {
    let listener = EventListener::new(ListenerConfig::default());

    let consumer_a = EventConsumer::new(listener.clone());
    consumer_a.bind("x", |_conn, _ev| {});

    let consumer_b = EventConsumer::new(listener.clone());
    consumer_b.bind("x", |_conn, _ev| {});

    assert!(listener.run().is_err());
    assert!(!listener.is_running());

    // The listener is not running, so attaching another server still works.
    let extra = Arc::new(TcpServer::bind(loopback()).unwrap());
    assert!(listener.attach_server(extra).is_ok());
}

/// Scenario 5: Server close.
#[test]
fn server_disconnect_fails_existing_connections_send_and_fires_once() {
    let server = Arc::new(TcpServer::bind(loopback()).unwrap());
    let addr = server.local_addr();

    let listener = EventListener::new(ListenerConfig::default());
    listener.attach_server(server.clone()).unwrap();

    let server_disconnect_count = Arc::new(AtomicUsize::new(0));
    let count2 = server_disconnect_count.clone();

    let consumer = EventConsumer::new(listener.clone());
    consumer.on_server_disconnect(move |_server_id: &usize| {
        count2.fetch_add(1, Ordering::SeqCst);
    });

    listener.run().unwrap();
    consumer.run().unwrap();

    let client = TcpClient::connect(addr, Duration::from_secs(2)).unwrap();
    // Make sure the connection is fully registered with the listener before
    // the server closes.
    client.connection().send(&make_event("warmup", |_| {})).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    server.disconnect();

    assert!(wait_until(Duration::from_secs(2), || server_disconnect_count.load(Ordering::SeqCst) == 1));
    assert_eq!(server_disconnect_count.load(Ordering::SeqCst), 1);

    assert!(wait_until(Duration::from_secs(2), || client.connection().send(&make_event("after", |_| {})).is_err()));
    assert!(client.connection().send(&make_event("after", |_| {})).is_err());

    client.disconnect();
    consumer.join();
    listener.join();
}

/// Scenario 6: Packet validity.
#[test]
fn mutating_a_tag_byte_to_an_unknown_value_invalidates_the_packet() {
    let packet = conduit::make_packet(|p| {
        p.write_str("hi");
        p.write(3i32);
        p.write(3.14f64);
    });
    assert!(conduit::is_valid(&packet));

    // Byte 0 is the first item's tag (String); corrupting it to a value no
    // `Tag` variant uses breaks the very first step of the tag walk.
    let mut bytes = packet.as_bytes().to_vec();
    bytes[0] = 0xFF;
    let corrupted = conduit::Packet::from_bytes(bytes);
    assert!(!conduit::is_valid(&corrupted));
}
