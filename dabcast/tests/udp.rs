mod common;

use common::delivered_from;
use dabcast::{MemorySink, Membership, Stack};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifo_over_loopback_udp() {
    const SIZE: usize = 3;
    const MESSAGES: i32 = 20;

    let mut channels = Vec::new();
    for _ in 0..SIZE {
        let channel = mepa::channel("127.0.0.1:0".parse().unwrap()).await;
        assert!(channel.is_ok());
        channels.push(channel.unwrap());
    }

    let mut content = format!("{}\n", SIZE);
    for (id, (_, receiver)) in channels.iter().enumerate() {
        let address = receiver.local_address().unwrap();
        content.push_str(&format!("{} {} {}\n", id + 1, address.ip(), address.port()));
    }

    let configuration = common::configuration();
    let mut stacks = Vec::new();
    let mut sinks = Vec::new();
    let mut pollers = Vec::new();
    for (id, (sender, receiver)) in channels.into_iter().enumerate() {
        let membership = Membership::parse(&content, id as u16, MESSAGES).unwrap();
        let sink = Arc::new(MemorySink::new());
        let stack = Arc::new(Stack::start(
            &configuration,
            membership,
            Arc::new(sender),
            sink.clone(),
        ));

        let inbound = stack.inbound();
        let shutdown = stack.shutdown();
        let mut receiver = receiver.with_timeout(Duration::from_millis(10));
        pollers.push(tokio::spawn(async move {
            receiver
                .poll(shutdown, move |data, _| inbound.receive(data))
                .await
        }));
        stacks.push(stack);
        sinks.push(sink);
    }

    let broadcasters: Vec<_> = stacks
        .iter()
        .map(|stack| {
            let stack = Arc::clone(stack);
            tokio::spawn(async move {
                for payload in 1..=MESSAGES {
                    stack.broadcast(payload).await.unwrap();
                }
            })
        })
        .collect();
    for broadcaster in broadcasters {
        assert!(broadcaster.await.is_ok());
    }

    let expected = SIZE * MESSAGES as usize;
    let delivered = common::eventually(Duration::from_secs(30), || {
        sinks.iter().all(|sink| sink.deliveries().len() >= expected)
    })
    .await;
    assert!(delivered);

    let order: Vec<i32> = (1..=MESSAGES).collect();
    for sink in &sinks {
        assert_eq!(sink.deliveries().len(), expected);
        for origin in 0..SIZE as u16 {
            assert_eq!(delivered_from(sink, origin), order);
        }
    }

    for stack in &stacks {
        assert!(stack.stop().await.is_ok());
    }
    for poller in pollers {
        let polled = tokio::time::timeout(Duration::from_secs(5), poller).await;
        assert!(polled.is_ok());
        assert!(polled.unwrap().unwrap().is_ok());
    }
}
