mod common;

use common::{FakeServer, ask_datagram, full_answer, info_datagram, player, roster_datagram};
use kartwatch_bot::{KnockError, Knocker, Remote};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

/// Short timeouts keep the failure paths fast
fn test_knocker(tries: u32) -> Knocker {
    Knocker::new(tries, Duration::from_millis(150))
}

// =============================================================================
// SUCCESSFUL KNOCKS
// =============================================================================

#[tokio::test]
async fn test_split_answer_is_reassembled() {
    // GIVEN: A server answering with its info and a page of three players
    let server = FakeServer::answering("Kart Club", &["Sonic", "Tails", "Knuckles"]).await;

    // WHEN: Knocking once
    let knock = test_knocker(3).knock(&server.remote()).await;

    // THEN: The answer holds the info and exactly the three players
    let answer = knock.result.expect("knock should succeed");
    assert_eq!(answer.info.server_name, "Kart Club");
    assert_eq!(answer.info.number_of_players, 3);
    let names: Vec<&str> = answer.players.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["Sonic", "Tails", "Knuckles"]);

    // AND: One ask was enough and produced one round-trip sample
    assert_eq!(server.asks(), 1);
    assert_eq!(knock.rtt_samples.len(), 1);
}

#[tokio::test]
async fn test_players_before_info_still_completes() {
    // GIVEN: A server that sends the roster ahead of its info
    let server = FakeServer::spawn(|_| {
        let mut replies = full_answer("Backwards", &["Amy", "Shadow"]);
        replies.reverse();
        replies
    })
    .await;

    // WHEN: Knocking
    let knock = test_knocker(3).knock(&server.remote()).await;

    // THEN: Arrival order does not matter
    let answer = knock.result.expect("knock should succeed");
    assert_eq!(answer.players.len(), 2);
    assert_eq!(server.asks(), 1);
}

#[tokio::test]
async fn test_empty_server_needs_no_roster() {
    // GIVEN: A server with nobody on it that only sends its info
    let server = FakeServer::spawn(|_| vec![info_datagram("Quiet", 0)]).await;

    // WHEN: Knocking
    let knock = test_knocker(2).knock(&server.remote()).await;

    // THEN: The info alone is a complete answer
    let answer = knock.result.expect("knock should succeed");
    assert!(answer.players.is_empty());
}

#[tokio::test]
async fn test_roster_spread_over_several_pages() {
    // GIVEN: A server splitting three players over two player-info replies
    let server = FakeServer::spawn(|_| {
        vec![
            info_datagram("Paged", 3),
            roster_datagram(&[player(0, "Sonic"), player(1, "Tails")]),
            roster_datagram(&[player(2, "Knuckles")]),
        ]
    })
    .await;

    // WHEN: Knocking
    let knock = test_knocker(2).knock(&server.remote()).await;

    // THEN: Both pages are merged
    let answer = knock.result.expect("knock should succeed");
    let nums: Vec<u8> = answer.players.iter().map(|p| p.num).collect();
    assert_eq!(nums, [0, 1, 2]);
}

#[tokio::test]
async fn test_garbage_datagrams_are_ignored() {
    // GIVEN: A server that sends noise before its real answer
    let server = FakeServer::spawn(|_| {
        let mut corrupted = info_datagram("Corrupt", 1);
        corrupted[20] ^= 0xFF;
        let mut unknown = info_datagram("Unknown", 0);
        unknown[6] = 32;

        let mut replies = vec![vec![0x01, 0x02, 0x03], corrupted, unknown];
        replies.extend(full_answer("Noisy", &["Sonic"]));
        replies
    })
    .await;

    // WHEN: Knocking
    let knock = test_knocker(2).knock(&server.remote()).await;

    // THEN: Bad datagrams are skipped and the real answer gets through
    let answer = knock.result.expect("knock should succeed");
    assert_eq!(answer.info.server_name, "Noisy");
    assert_eq!(answer.players.len(), 1);
    assert_eq!(server.asks(), 1);
}

#[tokio::test]
async fn test_incomplete_attempt_asks_again() {
    // GIVEN: A server whose first roster reply gets lost
    let server = FakeServer::spawn(|n| {
        if n == 0 {
            vec![info_datagram("Lossy", 2)]
        } else {
            full_answer("Lossy", &["Sonic", "Tails"])
        }
    })
    .await;

    // WHEN: Knocking with room for a retry
    let knock = test_knocker(3).knock(&server.remote()).await;

    // THEN: The second ask completes the answer
    let answer = knock.result.expect("knock should succeed");
    assert_eq!(answer.players.len(), 2);
    assert_eq!(server.asks(), 2);

    // AND: Both answered attempts produced a round-trip sample
    assert_eq!(knock.rtt_samples.len(), 2);
}

#[tokio::test]
async fn test_round_trip_covers_server_delay() {
    // GIVEN: A server that takes 60ms to answer
    let server =
        FakeServer::spawn_delayed(Duration::from_millis(60), |_| full_answer("Slow", &["Sonic"]))
            .await;

    // WHEN: Knocking
    let knock = Knocker::new(2, Duration::from_millis(500))
        .knock(&server.remote())
        .await;

    // THEN: The recorded round trip includes the delay
    assert!(knock.result.is_ok());
    assert_eq!(knock.rtt_samples.len(), 1);
    assert!(knock.rtt_samples[0] >= 60);
}

// =============================================================================
// FAILED KNOCKS
// =============================================================================

#[tokio::test]
async fn test_silent_server_exhausts_every_try() {
    // GIVEN: A server that never answers
    let server = FakeServer::silent().await;
    let knocker = test_knocker(3);

    // WHEN: Knocking
    let started = Instant::now();
    let knock = knocker.knock(&server.remote()).await;
    let elapsed = started.elapsed();

    // THEN: The knock fails after using every try
    match knock.result {
        Err(KnockError::Connect { attempts }) => assert_eq!(attempts, 3),
        other => panic!("expected a connect error, got {:?}", other),
    }
    assert_eq!(server.asks(), 3);
    assert!(knock.rtt_samples.is_empty());

    // AND: It stayed within its deadline, with some slack for the scheduler
    assert!(elapsed >= knocker.attempt_timeout() * 2);
    assert!(elapsed <= knocker.deadline() + knocker.attempt_timeout());
}

#[tokio::test]
async fn test_info_without_roster_fails() {
    // GIVEN: A server that advertises two players but never lists them
    let server = FakeServer::spawn(|_| vec![info_datagram("Half", 2)]).await;

    // WHEN: Knocking
    let knock = test_knocker(2).knock(&server.remote()).await;

    // THEN: The knock fails, but every answered attempt was timed
    assert!(matches!(
        knock.result,
        Err(KnockError::Connect { attempts: 2 })
    ));
    assert_eq!(knock.rtt_samples.len(), 2);
}

#[tokio::test]
async fn test_echoed_asks_are_not_answers() {
    // GIVEN: A peer that only echoes asks back
    let server = FakeServer::spawn(|_| vec![ask_datagram()]).await;

    // WHEN: Knocking
    let knock = test_knocker(2).knock(&server.remote()).await;

    // THEN: The knock fails without any round-trip sample
    assert!(matches!(
        knock.result,
        Err(KnockError::Connect { attempts: 2 })
    ));
    assert!(knock.rtt_samples.is_empty());
    assert_eq!(server.asks(), 2);
}

#[tokio::test]
async fn test_refused_port_still_waits_out_each_attempt() {
    // GIVEN: A port nobody listens on
    let closed = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let remote = Remote::from(closed.local_addr().unwrap());
    drop(closed);
    let knocker = test_knocker(2);

    // WHEN: Knocking it
    let started = Instant::now();
    let knock = knocker.knock(&remote).await;
    let elapsed = started.elapsed();

    // THEN: Refusals do not burn through the tries early
    assert!(matches!(
        knock.result,
        Err(KnockError::Connect { attempts: 2 })
    ));
    assert!(elapsed >= knocker.attempt_timeout());
}
