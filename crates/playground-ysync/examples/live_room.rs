//! Two clients co-editing a room over the in-process relay hub.
//!
//! Usage:
//!   cargo run -p playground-ysync --example live_room

use playground_ysync::{CursorSelection, RoomSession, SessionConfig, UserInfo};
use presence_relay::LocalRelayHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let relay = LocalRelayHub::new();

    // Alice opens the room with starter content.
    let config = SessionConfig::new("a1b2", UserInfo::new("alice", "Alice"))
        .with_problem("two-sum")
        .with_seed("// write your solution here\n");
    let mut alice = RoomSession::connect(&relay, config)?;
    alice
        .wait_until_synced(std::time::Duration::from_secs(5))
        .await?;
    println!("alice synced, content:\n{}", alice.content());

    // Bob joins the same room and problem; he converges from Alice.
    let mut bob = RoomSession::connect(
        &relay,
        SessionConfig::new("a1b2", UserInfo::new("bob", "Bob")).with_problem("two-sum"),
    )?;
    alice.pump();
    bob.wait_until_synced(std::time::Duration::from_secs(5))
        .await?;
    println!("bob synced, content:\n{}", bob.content());

    // Concurrent edits from both sides.
    alice.doc().insert(alice.doc().len(), "fn two_sum() {}\n");
    bob.doc().insert(0, "// authors: alice, bob\n");
    bob.set_local_cursor(Some(CursorSelection::caret(0)))?;

    // Drain until quiescent.
    loop {
        let processed = alice.pump() + bob.pump();
        if processed == 0 {
            break;
        }
    }

    println!("--- converged ---");
    println!("alice:\n{}", alice.content());
    println!("bob:\n{}", bob.content());
    assert_eq!(alice.content(), bob.content());

    let users: Vec<String> = alice
        .connected_users()
        .into_iter()
        .map(|u| format!("{} ({})", u.name, u.color))
        .collect();
    println!("in the room: {}", users.join(", "));

    bob.close();
    alice.pump();
    println!(
        "after bob left: {:?}",
        alice
            .connected_users()
            .into_iter()
            .map(|u| u.name)
            .collect::<Vec<_>>()
    );

    Ok(())
}
