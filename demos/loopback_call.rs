//! Loopback Call - Three participants in one process
//!
//! Run with: cargo run --example loopback_call
//!
//! This example demonstrates:
//! - Starting a `Session` per participant over loopback transports
//! - Join ordering: both sides of a pair learn of each other, and the one
//!   with the greater identifier calls while the other waits for its offer
//! - Muting and screen sharing through `MediaBinding`
//! - Watching the rendering view while participants leave
//!
//! ```text
//!   alice ◄──────► bob
//!     ▲             ▲
//!     └──► carol ◄──┘        one peer connection per pair
//! ```

use std::sync::Arc;

use meshcall::loopback::{LoopbackFactory, LoopbackHub};
use meshcall::signaling::wire;
use meshcall::{LocalTrack, ParticipantId, Session, SessionConfig};

fn start(hub: &LoopbackHub, id: &str) -> Session {
    Session::start(
        id,
        SessionConfig::default(),
        Arc::new(LoopbackFactory::new()),
        hub.endpoint(),
    )
}

async fn print_views(sessions: &[&Session]) {
    for session in sessions {
        let view = session.view().borrow().clone();
        for (peer, tile) in &view.participants {
            let tracks: Vec<_> = tile.remote_tracks.iter().map(|t| t.id.as_str()).collect();
            println!(
                "  {:>6} sees {:<6} {:?} tracks={:?}",
                session.local_id(),
                peer,
                tile.status,
                tracks
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("meshcall=info".parse()?)
                .add_directive("loopback_call=debug".parse()?),
        )
        .init();

    let hub = LoopbackHub::new();
    let alice = start(&hub, "alice");
    let bob = start(&hub, "bob");
    let carol = start(&hub, "carol");
    let everyone = [&alice, &bob, &carol];

    for session in everyone {
        session
            .media()
            .attach_local_track(LocalTrack::audio(format!("{}-mic", session.local_id())))
            .await;
        session
            .media()
            .attach_local_track(LocalTrack::video(format!("{}-cam", session.local_id())))
            .await;
    }

    // bob arrives: alice hears about it over the socket, bob reads the roster
    let joined = r#"{"event":"participant-joined","data":{"participant":{"id":"bob"}}}"#;
    alice.handle_wire(joined).await?;
    bob.join_roster(&[ParticipantId::from("alice")]).await;
    hub.exchange(&everyone).await;

    // carol arrives
    for resident in [&alice, &bob] {
        resident.participant_joined(&ParticipantId::from("carol")).await?;
    }
    carol
        .join_roster(&[ParticipantId::from("alice"), ParticipantId::from("bob")])
        .await;
    hub.exchange(&everyone).await;

    println!("Everyone connected:");
    print_views(&everyone).await;

    let audio = bob.media().toggle_audio().await;
    println!("bob audio enabled: {}", audio);
    carol
        .media()
        .start_screen_share(LocalTrack::screen("carol-screen"))
        .await;
    hub.exchange(&everyone).await;

    println!("After bob muted and carol shared their screen:");
    print_views(&everyone).await;

    for signal in hub.sent_by(&ParticipantId::from("carol")).iter().take(2) {
        println!("  wire: {}", wire::encode("demo-meeting", signal)?);
    }

    bob.end().await;
    hub.exchange(&everyone).await;

    println!("After bob left:");
    print_views(&[&alice, &carol]).await;

    for session in everyone {
        let stats = session.stats().await;
        println!(
            "  {:>6}: created={} closed={} signals={} stale={}",
            session.local_id(),
            stats.connections_created,
            stats.connections_closed,
            stats.signals_sent,
            stats.stale_events_discarded
        );
    }

    alice.end().await;
    carol.end().await;
    Ok(())
}
