//! Single-process walkthrough against the in-memory store.
//!
//! Spins up a host and a guest in one room, skips into a break after a few
//! seconds of focus, and prints every session event. Run with
//! `RUST_LOG=info cargo run --bin room-demo`.

use std::sync::Arc;
use std::time::Duration;

use cofocus::peer::null::NullAudioTransport;
use cofocus::store::memory::MemoryStore;
use cofocus::{AccountIdentity, FocusClient, RoomSettings, SessionEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cofocus::init_logging();

    let store = Arc::new(MemoryStore::new());
    let scratch = std::env::temp_dir().join("cofocus-demo");

    let host_client = FocusClient::connect(
        store.clone(),
        Arc::new(NullAudioTransport::new()),
        scratch.join("host.json"),
        Duration::from_secs(10),
    )
    .await?;
    let guest_client = FocusClient::connect(
        store.clone(),
        Arc::new(NullAudioTransport::new()),
        scratch.join("guest.json"),
        Duration::from_secs(10),
    )
    .await?;

    let host = host_client
        .create_room("Hana", RoomSettings::new(1, 1))
        .await?;
    host.sign_in(AccountIdentity {
        uid: "demo-hana".into(),
        display_name: "Hana".into(),
    })
    .await;
    host.set_task_label(Some("demo".into())).await;

    let mut guest = guest_client.join_room("Kei", host.room_id()).await?;
    let mut guest_events = guest.take_events().expect("fresh session");

    let printer = tokio::spawn(async move {
        while let Some(event) = guest_events.recv().await {
            match event {
                SessionEvent::TimerTick {
                    remaining_seconds,
                    is_break,
                    ..
                } => {
                    let phase = if is_break { "break" } else { "focus" };
                    println!("[guest] {phase} {remaining_seconds:>4}s left");
                }
                other => println!("[guest] {other:?}"),
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    println!("[host] skipping the rest of the work phase");
    host.skip_phase().await?;

    tokio::time::sleep(Duration::from_secs(5)).await;
    println!("[host] leaving, which closes the room");
    host.leave().await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    guest.leave().await;
    printer.abort();

    println!("final store state:");
    println!("{}", serde_json::to_string_pretty(&store.dump())?);
    Ok(())
}
