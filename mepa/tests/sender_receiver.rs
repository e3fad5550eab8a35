use bytes::Bytes;
use std::time::Duration;

/// Here we are creating both the receiver and sender. The receiver is spawned in another task
/// along with a mpsc sender channel. The sender will publish 15 datagrams and then use the mpsc
/// receiver to wait for the datagrams sent previously.
/// Loopback UDP should not lose anything at this rate, but we still bound the wait with a 5s
/// timeout so a lost datagram fails the test instead of hanging it.
#[tokio::test]
async fn send_and_receive_messages() {
    let transport = mepa::channel("127.0.0.1:0".parse().unwrap()).await;
    assert!(transport.is_ok());

    let (sender, mut receiver) = transport.unwrap();
    let destination = receiver.local_address();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let signal = mepa::Signal::new();
    let shutdown = signal.subscribe();

    assert!(destination.is_ok());
    let destination = destination.unwrap();

    let handle = tokio::spawn(async move {
        let polled = receiver
            .poll(shutdown, |data, _| {
                assert!(tx.send(data).is_ok());
            })
            .await;
        assert!(polled.is_ok());
    });

    for i in 0..15u32 {
        assert!(sender.send(&i.to_be_bytes(), destination).is_ok());
    }

    let mut received = Vec::new();
    for _ in 0..15 {
        let data = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(data.is_ok());
        let data = data.unwrap();
        assert!(data.is_some());
        received.push(data.unwrap());
    }

    received.sort();
    let expected: Vec<Bytes> = (0..15u32)
        .map(|i| Bytes::copy_from_slice(&i.to_be_bytes()))
        .collect();
    assert_eq!(received, expected);

    signal.fire();
    assert!(handle.await.is_ok());
}

/// Each datagram is delivered whole, no matter how large it is compared to the others.
#[tokio::test]
async fn send_receive_single_large_datagram() {
    const CHUNK_SIZE: usize = 16 * 1024;
    let (sender, mut receiver) = mepa::channel("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let destination = receiver.local_address().unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let signal = mepa::Signal::new();
    let shutdown = signal.subscribe();

    tokio::spawn(async move {
        let _ = receiver
            .poll(shutdown, |data, source| {
                let _ = tx.send((data, source));
            })
            .await;
    });

    assert!(sender.send(&[97; 8], destination).is_ok());
    assert!(sender.send(&[97; CHUNK_SIZE], destination).is_ok());

    let mut sizes = Vec::new();
    for _ in 0..2 {
        let data = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(data.is_ok());
        let (data, source) = data.unwrap().unwrap();
        assert_eq!(source, sender.local_address().unwrap());
        sizes.push(data.len());
    }

    sizes.sort();
    assert_eq!(sizes, vec![8, CHUNK_SIZE]);
    signal.fire();
}

/// Binding can return an error.
#[tokio::test]
async fn duplicate_bind_returns_error() {
    let st = mepa::channel("127.0.0.1:0".parse().unwrap()).await;
    assert!(st.is_ok());

    let (_, receiver) = st.unwrap();
    let nd = mepa::channel(receiver.local_address().unwrap()).await;
    assert!(nd.is_err());
}
