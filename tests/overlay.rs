use std::time::Duration;

use overlay_router::algorithms::AlgorithmKind;
use overlay_router::{Node, NodeConfig, NodeHandle, NodeSnapshot, RoutingError};

const CONVERGENCE: Duration = Duration::from_secs(10);

fn config(name: &str, algorithm: AlgorithmKind) -> NodeConfig {
    NodeConfig {
        name: Some(name.into()),
        port: 0,
        algorithm,
        connect_timeout_secs: 2,
        ..NodeConfig::default()
    }
}

async fn spawn(name: &str, algorithm: AlgorithmKind) -> NodeHandle {
    Node::spawn(config(name, algorithm)).await.unwrap()
}

async fn link(from: &NodeHandle, to: &NodeHandle, cost: u32) {
    from.connect("127.0.0.1", to.local_addr().port(), cost).await.unwrap();
}

/// Poll `node` until `check` holds or the convergence deadline passes.
async fn wait_for(node: &NodeHandle, what: &str, check: impl Fn(&NodeSnapshot) -> bool) -> NodeSnapshot {
    let deadline = tokio::time::Instant::now() + CONVERGENCE;
    loop {
        let snapshot = node.snapshot().await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("{} never saw {}: {:?}", node.name(), what, snapshot.routes);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn route_is(snapshot: &NodeSnapshot, dest: &str, distance: u32, next_hop: &str) -> bool {
    snapshot
        .routes
        .get_route(dest)
        .is_some_and(|r| r.distance == distance && r.next_hop == next_hop)
}

/// A-B=1, B-C=1, A-C=5
async fn triangle(algorithm: AlgorithmKind) -> (NodeHandle, NodeHandle, NodeHandle) {
    let a = spawn("A", algorithm).await;
    let b = spawn("B", algorithm).await;
    let c = spawn("C", algorithm).await;
    link(&a, &b, 1).await;
    link(&b, &c, 1).await;
    link(&a, &c, 5).await;
    (a, b, c)
}

async fn assert_triangle_converges(a: &NodeHandle, c: &NodeHandle) {
    wait_for(a, "C at 2 via B", |s| route_is(s, "C", 2, "B")).await;
    wait_for(c, "A at 2 via B", |s| route_is(s, "A", 2, "B")).await;
}

#[tokio::test]
async fn test_triangle_link_state() {
    let (a, _b, c) = triangle(AlgorithmKind::LinkState).await;
    assert_triangle_converges(&a, &c).await;
}

#[tokio::test]
async fn test_triangle_distance_vector() {
    let (a, _b, c) = triangle(AlgorithmKind::DistanceVector).await;
    assert_triangle_converges(&a, &c).await;
}

#[tokio::test]
async fn test_triangle_centralized() {
    let mut hq_config = config("HQ", AlgorithmKind::CentralizedLinkState);
    hq_config.coordinator = true;
    let hq = Node::spawn(hq_config).await.unwrap();
    let hq_addr = format!("127.0.0.1:{}", hq.local_addr().port());

    let a = spawn("A", AlgorithmKind::CentralizedLinkState).await;
    let b = spawn("B", AlgorithmKind::CentralizedLinkState).await;
    let c = spawn("C", AlgorithmKind::CentralizedLinkState).await;
    for member in [&a, &b, &c] {
        assert_eq!(member.attach_coordinator(&hq_addr).await.unwrap(), "HQ");
    }
    link(&a, &b, 1).await;
    link(&b, &c, 1).await;
    link(&a, &c, 5).await;

    assert_triangle_converges(&a, &c).await;
    let snapshot = a.snapshot().await.unwrap();
    assert_eq!(snapshot.coordinator.as_deref(), Some("HQ"));
    // The coordinator is not part of the topology
    assert!(snapshot.routes.get_route("HQ").is_none());
}

#[tokio::test]
async fn test_duplicate_name_is_refused() {
    let a = spawn("A", AlgorithmKind::DistanceVector).await;
    let b = spawn("B", AlgorithmKind::DistanceVector).await;
    let impostor = spawn("A", AlgorithmKind::DistanceVector).await;
    link(&a, &b, 1).await;

    let err = impostor
        .connect("127.0.0.1", b.local_addr().port(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, RoutingError::HandshakeRejected(reason) if reason.contains("already connected")));

    let snapshot = b.snapshot().await.unwrap();
    assert_eq!(snapshot.neighbors.len(), 1);
    assert!(impostor.snapshot().await.unwrap().neighbors.is_empty());
}

#[tokio::test]
async fn test_packet_crosses_two_hops() {
    let a = spawn("A", AlgorithmKind::LinkState).await;
    let b = spawn("B", AlgorithmKind::LinkState).await;
    let c = spawn("C", AlgorithmKind::LinkState).await;
    link(&a, &b, 1).await;
    link(&b, &c, 1).await;
    wait_for(&a, "C via B", |s| route_is(s, "C", 2, "B")).await;
    wait_for(&b, "C direct", |s| route_is(s, "C", 1, "C")).await;

    let mut deliveries = c.deliveries();
    a.send("C", "hello over two hops").await.unwrap();

    let delivery = tokio::time::timeout(CONVERGENCE, deliveries.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.from, "A");
    assert_eq!(delivery.path, vec!["A", "B", "C"]);
    assert_eq!(delivery.packet.inner_payload, serde_json::json!("hello over two hops"));
}

#[tokio::test]
async fn test_send_to_unknown_destination_fails() {
    let a = spawn("A", AlgorithmKind::DistanceVector).await;
    let err = a.send("Nowhere", "x").await.unwrap_err();
    assert!(matches!(err, RoutingError::RouteNotFound(dest) if dest == "Nowhere"));
}

#[tokio::test]
async fn test_lost_neighbor_reroutes_link_state() {
    let (a, b, _c) = triangle(AlgorithmKind::LinkState).await;
    wait_for(&a, "C via B", |s| route_is(s, "C", 2, "B")).await;

    b.shutdown();
    let snapshot = wait_for(&a, "C direct after B left", |s| route_is(s, "C", 5, "C")).await;
    assert!(snapshot.neighbors.iter().all(|n| n.name != "B"));
}

#[tokio::test]
async fn test_lost_neighbor_reroutes_distance_vector() {
    let (a, b, _c) = triangle(AlgorithmKind::DistanceVector).await;
    wait_for(&a, "C via B", |s| route_is(s, "C", 2, "B")).await;

    b.shutdown();
    wait_for(&a, "C direct and no B after B left", |s| {
        route_is(s, "C", 5, "C") && s.routes.get_route("B").is_none()
    })
    .await;
}

#[tokio::test]
async fn test_edge_change_propagates() {
    let (a, b, c) = triangle(AlgorithmKind::DistanceVector).await;
    assert_triangle_converges(&a, &c).await;

    a.set_edge_cost("B", 10).await.unwrap();
    wait_for(&a, "C direct", |s| route_is(s, "C", 5, "C")).await;
    wait_for(&b, "edge to A at 10", |s| {
        s.neighbors.iter().any(|n| n.name == "A" && n.cost == 10)
    })
    .await;
    // B now reaches A through C
    wait_for(&b, "A via C", |s| route_is(s, "A", 6, "C")).await;

    let err = a.set_edge_cost("Z", 1).await.unwrap_err();
    assert!(matches!(err, RoutingError::UnknownNeighbor(_)));
}
