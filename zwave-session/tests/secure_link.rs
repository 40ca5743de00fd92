//! Two security contexts wired back to back over channel transports

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use zwave_core::{NodeId, Opp, TxStatus, ZwError, ZwResult};
use zwave_security::{NetworkKey, RngEntropy};
use zwave_session::{
    AddingNodeEvent, ChannelEventListener, IncludedNodeEvent, Inbound, SecurityConfig,
    SecurityContext, SecurityEvent, SendOrigin, TxState,
};
use zwave_transport::{ChannelSettings, ChannelTransport, FrameReceiver};

struct Peer {
    ctx: Arc<SecurityContext>,
    frames: FrameReceiver,
    events: UnboundedReceiver<SecurityEvent>,
}

fn node(id: u8) -> NodeId {
    NodeId::new(id).unwrap()
}

async fn peer(id: u8, is_controller: bool) -> Peer {
    let (transport, frames) = ChannelTransport::new(ChannelSettings::default());
    let (listener, events) = ChannelEventListener::new();
    let config = SecurityConfig::builder()
        .node_id(id)
        .controller(is_controller)
        .build()
        .unwrap();
    let ctx = SecurityContext::builder(Arc::new(transport))
        .config(config)
        .entropy(Box::new(RngEntropy::new(StdRng::seed_from_u64(id as u64 * 31))))
        .listener(Arc::new(listener))
        .build()
        .await
        .unwrap();
    Peer {
        ctx: Arc::new(ctx),
        frames,
        events,
    }
}

/// Deliver every frame `from` sends to `to`, acknowledging it first
fn wire(
    from: Arc<SecurityContext>,
    mut frames: FrameReceiver,
    to: Arc<SecurityContext>,
    delivered: UnboundedSender<ZwResult<Inbound>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(out) = frames.recv().await {
            from.on_tx_complete(out.token, TxStatus::Ok);
            let result = to.handle_frame(from.node_id(), &out.frame);
            if delivered.send(result).is_err() {
                break;
            }
        }
    })
}

struct Link {
    a: Arc<SecurityContext>,
    b: Arc<SecurityContext>,
    events_a: UnboundedReceiver<SecurityEvent>,
    events_b: UnboundedReceiver<SecurityEvent>,
    at_b: UnboundedReceiver<ZwResult<Inbound>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    fn new(a: Peer, b: Peer) -> Self {
        let (to_a, _at_a) = unbounded_channel();
        let (to_b, at_b) = unbounded_channel();
        let tasks = vec![
            wire(Arc::clone(&a.ctx), a.frames, Arc::clone(&b.ctx), to_b),
            wire(Arc::clone(&b.ctx), b.frames, Arc::clone(&a.ctx), to_a),
        ];
        Self {
            a: a.ctx,
            b: b.ctx,
            events_a: a.events,
            events_b: b.events,
            at_b,
            tasks,
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn next_command(delivered: &mut UnboundedReceiver<ZwResult<Inbound>>) -> Opp {
    loop {
        let result = tokio::time::timeout(Duration::from_secs(5), delivered.recv())
            .await
            .expect("no frame delivered")
            .expect("link closed");
        if let Ok(Inbound::Command(opp)) = result {
            return opp;
        }
    }
}

async fn wait_for<F>(events: &mut UnboundedReceiver<SecurityEvent>, matches: F) -> SecurityEvent
where
    F: Fn(&SecurityEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event not published")
            .expect("listener dropped");
        if matches(&event) {
            return event;
        }
    }
}

async fn keyed_peers() -> (Peer, Peer) {
    let a = peer(1, true).await;
    let b = peer(2, false).await;
    let key = NetworkKey::new([0x3C; 16]);
    a.ctx.set_network_key(key.clone());
    b.ctx.set_network_key(key);
    (a, b)
}

#[tokio::test]
async fn test_secure_send_delivers_payload() {
    let (a, b) = keyed_peers().await;
    let mut link = Link::new(a, b);

    link.a.secure_send(node(2), &[0x25, 0x01, 0xFF]).unwrap();
    assert_eq!(next_command(&mut link.at_b).await.as_slice(), &[0x25, 0x01, 0xFF]);

    let done = wait_for(&mut link.events_a, |e| {
        matches!(e, SecurityEvent::SendCompleted { .. })
    })
    .await;
    assert_eq!(
        done,
        SecurityEvent::SendCompleted {
            node: node(2),
            origin: SendOrigin::Application,
            result: Ok(()),
        }
    );
    assert_eq!(link.a.statistics().frames_secured, 1);
}

#[tokio::test]
async fn test_payload_over_one_frame_is_split() {
    let (a, b) = keyed_peers().await;
    let mut link = Link::new(a, b);
    let payload: Vec<u8> = (1..=27).collect();

    link.a.secure_send(node(2), &payload).unwrap();
    let mut results = Vec::new();
    while !matches!(results.last(), Some(Ok(Inbound::Command(_)))) {
        let result = tokio::time::timeout(Duration::from_secs(5), link.at_b.recv())
            .await
            .unwrap()
            .unwrap();
        results.push(result);
    }
    assert!(results.contains(&Ok(Inbound::FragmentPending)));
    assert_eq!(
        results.last(),
        Some(&Ok(Inbound::Command(Opp::from_slice(&payload).unwrap())))
    );
    assert_eq!(link.b.statistics().frames_decoded, 2);

    wait_for(&mut link.events_a, |e| {
        matches!(e, SecurityEvent::SendCompleted { result: Ok(()), .. })
    })
    .await;
    assert_eq!(link.a.statistics().frames_secured, 2);
}

#[tokio::test]
async fn test_queued_sends_complete_in_order() {
    let (a, b) = keyed_peers().await;
    let mut link = Link::new(a, b);

    for i in 0..3u8 {
        link.a.secure_send(node(2), &[0x20, 0x01, i]).unwrap();
    }
    for i in 0..3u8 {
        assert_eq!(next_command(&mut link.at_b).await.as_slice(), &[0x20, 0x01, i]);
    }
    for _ in 0..3 {
        wait_for(&mut link.events_a, |e| {
            matches!(e, SecurityEvent::SendCompleted { result: Ok(()), .. })
        })
        .await;
    }
    assert_eq!(link.a.pending_sends(), 0);
}

#[tokio::test]
async fn test_secure_inclusion() {
    let controller = peer(1, true).await;
    let joiner = peer(5, false).await;
    controller.ctx.generate_network_key().unwrap();
    joiner
        .ctx
        .included_node_event(IncludedNodeEvent::UnsecuredInclusionDone)
        .unwrap();
    let mut link = Link::new(controller, joiner);

    link.a
        .adding_node_event(AddingNodeEvent::Start {
            node: node(5),
            is_controller: false,
            delay: None,
        })
        .unwrap();

    let added = wait_for(&mut link.events_a, |e| {
        matches!(e, SecurityEvent::AddNodeCompleted { .. })
    })
    .await;
    assert_eq!(
        added,
        SecurityEvent::AddNodeCompleted {
            node: node(5),
            result: Ok(()),
        }
    );
    let included = wait_for(&mut link.events_b, |e| {
        matches!(e, SecurityEvent::InclusionCompleted { .. })
    })
    .await;
    assert_eq!(
        included,
        SecurityEvent::InclusionCompleted {
            controller: Some(node(1)),
            result: Ok(()),
        }
    );
    assert!(link.b.network_key_installed());

    link.b.secure_send(node(1), &[0x71, 0x05]).unwrap();
    wait_for(&mut link.events_b, |e| {
        matches!(
            e,
            SecurityEvent::SendCompleted {
                origin: SendOrigin::Application,
                result: Ok(()),
                ..
            }
        )
    })
    .await;
}

#[tokio::test]
async fn test_supported_commands_exchange() {
    let a = peer(1, true).await;
    let (transport, frames) = ChannelTransport::new(ChannelSettings::default());
    let (listener, events) = ChannelEventListener::new();
    let config = SecurityConfig::builder()
        .node_id(2)
        .secure_command_classes(vec![0x62, 0x63])
        .build()
        .unwrap();
    let b = Peer {
        ctx: Arc::new(
            SecurityContext::builder(Arc::new(transport))
                .config(config)
                .listener(Arc::new(listener))
                .build()
                .await
                .unwrap(),
        ),
        frames,
        events,
    };
    let key = NetworkKey::new([0x11; 16]);
    a.ctx.set_network_key(key.clone());
    b.ctx.set_network_key(key);
    let mut link = Link::new(a, b);

    link.a.request_supported_commands(node(2)).unwrap();
    let report = wait_for(&mut link.events_a, |e| {
        matches!(e, SecurityEvent::SupportedCommands { .. })
    })
    .await;
    assert_eq!(
        report,
        SecurityEvent::SupportedCommands {
            node: node(2),
            command_classes: vec![0x62, 0x63],
        }
    );
}

#[tokio::test]
async fn test_tampered_frame_is_discarded() {
    let (mut a, mut b) = keyed_peers().await;

    a.ctx.secure_send(node(2), &[0x20, 0x01, 0x63]).unwrap();
    let nonce_get = a.frames.recv().await.unwrap();
    a.ctx.on_tx_complete(nonce_get.token, TxStatus::Ok);
    b.ctx.handle_frame(node(1), &nonce_get.frame).unwrap();
    let report = b.frames.recv().await.unwrap();
    b.ctx.on_tx_complete(report.token, TxStatus::Ok);
    a.ctx.handle_frame(node(2), &report.frame).unwrap();
    let spp = a.frames.recv().await.unwrap();

    for bit in [0usize, 7, 20, 70] {
        let mut tampered = spp.frame.to_vec();
        tampered[10 + bit / 8] ^= 1 << (bit % 8);
        assert_eq!(b.ctx.handle_frame(node(1), &tampered), Err(ZwError::Auth));
    }
    let mut bad_mac = spp.frame.to_vec();
    let last = bad_mac.len() - 1;
    bad_mac[last] ^= 0x01;
    assert_eq!(b.ctx.handle_frame(node(1), &bad_mac), Err(ZwError::Auth));
    assert!(b.frames.try_recv().is_none());
    assert_eq!(b.ctx.statistics().auth_failures, 5);

    assert_eq!(
        b.ctx.handle_frame(node(1), &spp.frame),
        Ok(Inbound::Command(Opp::from_slice(&[0x20, 0x01, 0x63]).unwrap()))
    );
    assert_eq!(
        b.ctx.handle_frame(node(1), &spp.frame),
        Err(ZwError::NonceNotFound)
    );
}

#[tokio::test]
async fn test_queue_holds_eight_requests() {
    let (a, _b) = keyed_peers().await;
    for i in 0..8u8 {
        a.ctx.secure_send(node(2), &[0x20, i]).unwrap();
    }
    assert_eq!(a.ctx.secure_send(node(2), &[0x20, 8]), Err(ZwError::QueueFull));
    assert_eq!(a.ctx.pending_sends(), 8);
    assert_eq!(a.ctx.statistics().queue_full, 1);
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_times_out_once() {
    let (mut a, _b) = keyed_peers().await;
    a.events.recv().await;

    a.ctx.secure_send(node(2), &[0x20, 0x01]).unwrap();
    a.ctx.secure_send(node(2), &[0x20, 0x02]).unwrap();
    let first = a.frames.recv().await.unwrap();
    a.ctx.on_tx_complete(first.token, TxStatus::Ok);
    assert_eq!(a.ctx.tx_state(), TxState::WaitExternalNonce);

    tokio::time::sleep(Duration::from_millis(10_100)).await;
    assert_eq!(
        a.events.try_recv().ok(),
        Some(SecurityEvent::SendCompleted {
            node: node(2),
            origin: SendOrigin::Application,
            result: Err(ZwError::Timeout),
        })
    );
    assert!(a.events.try_recv().is_err());

    // the second request starts with its own nonce request
    let second = a.frames.try_recv().unwrap();
    assert_eq!(second.frame.as_ref(), &[0x98, 0x40]);
    assert_eq!(a.ctx.tx_state(), TxState::WaitNonceGetTxStatus);
    assert_eq!(a.ctx.statistics().timeouts, 1);
}
