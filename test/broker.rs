//! End-to-end tests driving a real [`Broker`] over TCP through [`Client`].

use std::thread;
use std::time::Duration;

use meshpub::client::Client;
use meshpub::codec::Format;
use meshpub::{Broker, Config};
use serde_json::{json, Value};

/// Binds a broker on an OS-assigned port and runs it on a background thread.
/// Returns the address to connect to; the broker outlives the test process
/// (there is no per-test shutdown — the process exit reaps the thread).
fn spawn_broker() -> std::net::SocketAddr {
    let config = Config { host: "localhost".into(), port: 0, backlog: 100 };
    let mut broker = Broker::bind(&config).expect("bind");
    let addr = broker.local_addr().expect("local_addr");
    thread::spawn(move || broker.run().expect("broker run loop"));
    // Give the reactor thread a moment to enter its poll loop before the
    // first client connects.
    thread::sleep(Duration::from_millis(20));
    addr
}

fn recv_send_data(client: &mut Client) -> Value {
    match client.recv().expect("recv") {
        meshpub::message::Frame::Send { data } => data,
        other => panic!("expected a SEND frame, got {other:?}"),
    }
}

#[test]
fn basic_pub_sub_json() {
    let addr = spawn_broker();
    let mut sub = Client::connect(addr, Format::Json).unwrap();
    let mut publisher = Client::connect(addr, Format::Json).unwrap();

    sub.subscribe("/weather").unwrap();
    thread::sleep(Duration::from_millis(20));

    publisher.publish("/weather", json!("sunny")).unwrap();

    assert_eq!(recv_send_data(&mut sub), json!("sunny"));
}

#[test]
fn retained_value_delivered_on_subscribe() {
    let addr = spawn_broker();
    let mut publisher = Client::connect(addr, Format::Json).unwrap();
    publisher.publish("/temp", json!(42)).unwrap();
    thread::sleep(Duration::from_millis(20));

    let mut sub = Client::connect(addr, Format::Json).unwrap();
    sub.subscribe("/temp").unwrap();

    assert_eq!(recv_send_data(&mut sub), json!(42));
}

#[test]
fn ancestor_broadcast_reaches_prefix_subscribers_only() {
    let addr = spawn_broker();
    let mut c1 = Client::connect(addr, Format::Json).unwrap();
    let mut c2 = Client::connect(addr, Format::Json).unwrap();
    let mut c3 = Client::connect(addr, Format::Json).unwrap();
    let mut publisher = Client::connect(addr, Format::Json).unwrap();

    c1.subscribe("/a").unwrap();
    c2.subscribe("/a/b").unwrap();
    c3.subscribe("/other").unwrap();
    thread::sleep(Duration::from_millis(20));

    publisher.publish("/a/b/c", json!("hello")).unwrap();

    assert_eq!(recv_send_data(&mut c1), json!("hello"));
    assert_eq!(recv_send_data(&mut c2), json!("hello"));

    c3.unsubscribe("/other").unwrap();
}

#[test]
fn cross_format_fanout_reencodes_per_subscriber() {
    let addr = spawn_broker();
    let mut c_json = Client::connect(addr, Format::Json).unwrap();
    let mut c_xml = Client::connect(addr, Format::Xml).unwrap();
    let mut publisher = Client::connect(addr, Format::Json).unwrap();

    c_json.subscribe("/mix").unwrap();
    c_xml.subscribe("/mix").unwrap();
    thread::sleep(Duration::from_millis(20));

    publisher.publish("/mix", json!("hi")).unwrap();

    assert_eq!(recv_send_data(&mut c_json), json!("hi"));
    assert_eq!(recv_send_data(&mut c_xml), json!("hi"));
}

#[test]
fn list_after_retention_contains_exactly_the_published_topics() {
    let addr = spawn_broker();
    let mut publisher = Client::connect(addr, Format::Json).unwrap();
    publisher.publish("/a", json!(1)).unwrap();
    publisher.publish("/a/b", json!(2)).unwrap();
    publisher.publish("/x", json!(3)).unwrap();
    thread::sleep(Duration::from_millis(20));

    let mut requester = Client::connect(addr, Format::Json).unwrap();
    requester.request_topics().unwrap();

    match requester.recv().unwrap() {
        meshpub::message::Frame::ListReply { mut topics } => {
            topics.sort();
            assert_eq!(topics, vec!["/a".to_string(), "/a/b".to_string(), "/x".to_string()]);
        }
        other => panic!("expected a REP_TOPICS frame, got {other:?}"),
    }
}

#[test]
fn unsubscribe_stops_further_delivery() {
    let addr = spawn_broker();
    let mut c = Client::connect(addr, Format::Json).unwrap();
    let mut publisher = Client::connect(addr, Format::Json).unwrap();

    c.subscribe("/t").unwrap();
    thread::sleep(Duration::from_millis(20));
    c.unsubscribe("/t").unwrap();
    thread::sleep(Duration::from_millis(20));

    publisher.publish("/t", json!("too late")).unwrap();
    thread::sleep(Duration::from_millis(20));

    // The broker closed `c`'s socket on UNSUBSCRIBE; the subsequent publish
    // must not have been queued to it, so the next read sees EOF rather than
    // a SEND frame.
    assert!(c.recv().is_err());
}

#[test]
fn retention_is_per_node_not_inherited_from_a_publish_to_the_parent() {
    let addr = spawn_broker();
    let mut publisher = Client::connect(addr, Format::Json).unwrap();
    publisher.publish("/a", json!("for a")).unwrap();
    thread::sleep(Duration::from_millis(20));

    // `/a/b` has never been published to, only its parent `/a` has — so
    // subscribing to it must not trigger an immediate SEND.
    let mut sub = Client::connect(addr, Format::Json).unwrap();
    sub.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
    sub.subscribe("/a/b").unwrap();

    let err = sub.recv().expect_err("no retained value should have been delivered for /a/b");
    let io_err = match err {
        meshpub::BrokerError::Io(e) => e,
        other => panic!("expected a read-timeout io error, got {other:?}"),
    };
    assert!(matches!(io_err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut));
}
