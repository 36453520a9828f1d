use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use shoal::link::MemoryNetwork;
use shoal::signaling::LocalSignaling;
use shoal::{Identity, MeshConfig, MeshEvent, MeshManager, MessageKind, RoomName};
use tokio::sync::mpsc;

/// Print everything one participant sees
fn watch(name: &'static str, mut events: mpsc::UnboundedReceiver<MeshEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                MeshEvent::Message { message, .. } => {
                    println!("[{}] {}: {}", name, message.sender_name, message.body);
                }
                MeshEvent::PeerConnected { peer_name, .. } => {
                    println!("[{}] linked with {}", name, peer_name);
                }
                MeshEvent::PeerDisconnected { peer_id } => {
                    println!("[{}] lost {}", name, peer_id);
                }
                MeshEvent::NegotiationFailed { peer_id } => {
                    println!("[{}] could not reach {}", name, peer_id);
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let room = std::env::args()
        .nth(1)
        .map(RoomName::new)
        .unwrap_or_else(RoomName::generate);
    let signaling = LocalSignaling::new();
    let network = Arc::new(MemoryNetwork::new());

    println!("Room {}: three participants, one mesh\n", room);

    let mut members = Vec::new();
    for name in ["alice", "bob", "carol"] {
        let (mesh, events) = MeshManager::join(
            Identity::new(name),
            room.clone(),
            &signaling,
            network.clone(),
            MeshConfig::from_env(),
        )
        .await?;
        watch(name, events);
        members.push(mesh);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    for mesh in &members {
        let peers = mesh.connected_peers().await?;
        println!(
            "{} is linked to {} peer(s)",
            mesh.identity().display_name,
            peers.len()
        );
    }

    members[0].send_text("hello, everyone").await?;
    members[1].send("👋", MessageKind::Emoji).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    members[2].disconnect().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    for mesh in &members[..2] {
        mesh.disconnect().await;
    }
    Ok(())
}
