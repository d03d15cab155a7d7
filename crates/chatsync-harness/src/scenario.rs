//! Randomized chaos scenarios.
//!
//! A scenario drives one client through a seeded sequence of operations:
//! peers posting and creating rooms, the session sending and switching
//! rooms, responses arriving out of order, channels dropping and garbage on
//! the push channel. Invariants are checked after every event. At the end
//! chaos is switched off, the channel is brought back, the directory and the
//! focused room are reloaded, and the client must agree with the server.

use std::{fmt, time::Duration};

use chatsync_client::ClientEvent;
use chatsync_core::{DeliveryState, MessageDraft, Session, SyncConfig};
use chatsync_proto::{RawEvent, RoomId, RoomKind, UserId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    ChaosConfig, SimDriver, SimEnv, SimServer,
    invariants::{InvariantRegistry, Violation},
};

/// Virtual time between scheduled ticks.
const TICK: Duration = Duration::from_millis(250);

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Seed of every random choice in the run
    pub seed: u64,
    /// Operations to perform before the convergence phase
    pub steps: usize,
    /// Fault injection during the operation phase
    pub chaos: ChaosConfig,
    /// Client configuration
    pub config: SyncConfig,
    /// Rooms that exist before the session starts
    pub initial_rooms: usize,
    /// Other users posting into the session user's rooms
    pub peers: usize,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            seed: 0,
            steps: 200,
            chaos: ChaosConfig::lossy(),
            config: SyncConfig::default(),
            initial_rooms: 3,
            peers: 2,
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct ScenarioReport {
    /// Seed of the run
    pub seed: u64,
    /// Operations performed
    pub steps: usize,
    /// Messages the session sent (retries included)
    pub sent: u64,
    /// Messages peers posted
    pub peer_posts: u64,
    /// Forced channel drops
    pub disconnects: u64,
    /// Push envelopes the client discarded as unrecognized
    pub unrecognized: u64,
    /// Invariant violations, tagged with the driver step
    pub violations: Vec<(u64, Violation)>,
    /// Differences between client and server after the final resync
    pub divergence: Vec<String>,
}

impl ScenarioReport {
    /// Whether the run kept every invariant and converged.
    pub fn is_success(&self) -> bool {
        self.violations.is_empty() && self.divergence.is_empty()
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "seed {}: {} steps, {} sent, {} peer posts, {} disconnects, {} unrecognized",
            self.seed,
            self.steps,
            self.sent,
            self.peer_posts,
            self.disconnects,
            self.unrecognized
        )?;
        for (step, violation) in &self.violations {
            writeln!(f, "  step {step}: {violation}")?;
        }
        for divergence in &self.divergence {
            writeln!(f, "  divergence: {divergence}")?;
        }
        Ok(())
    }
}

/// Operation picked for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    PeerPost,
    Send,
    SwitchRoom,
    CloseRoom,
    Deliver,
    Pump,
    Tick,
    Heartbeat,
    Disconnect,
    RetryOrDiscard,
    PeerCreatesRoom,
    Garbage,
    ReloadRooms,
}

/// Relative weights of the operations.
const OPS: [(Op, u32); 13] = [
    (Op::PeerPost, 12),
    (Op::Send, 10),
    (Op::SwitchRoom, 4),
    (Op::CloseRoom, 1),
    (Op::Deliver, 20),
    (Op::Pump, 20),
    (Op::Tick, 10),
    (Op::Heartbeat, 2),
    (Op::Disconnect, 1),
    (Op::RetryOrDiscard, 3),
    (Op::PeerCreatesRoom, 1),
    (Op::Garbage, 2),
    (Op::ReloadRooms, 1),
];

fn pick_op(rng: &mut ChaCha8Rng) -> Op {
    let total: u32 = OPS.iter().map(|(_, weight)| weight).sum();
    let mut roll = rng.gen_range(0..total);
    for (op, weight) in OPS {
        if roll < weight {
            return op;
        }
        roll -= weight;
    }
    Op::Pump
}

struct Run {
    rng: ChaCha8Rng,
    driver: SimDriver,
    session: Session,
    peers: Vec<Session>,
    report: ScenarioReport,
    counter: u64,
}

impl Run {
    fn server(&self) -> &SimServer {
        self.driver.server()
    }

    fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.rng.gen_range(0..items.len()))
    }

    fn session_rooms(&self) -> Vec<RoomId> {
        self.server().rooms_for(&self.session.user_id).into_iter().map(|room| room.id).collect()
    }

    fn next_body(&mut self, author: &str) -> String {
        self.counter += 1;
        format!("{author} #{}", self.counter)
    }

    fn step(&mut self, op: Op) {
        match op {
            Op::PeerPost => {
                let rooms = self.session_rooms();
                let peers = self.peers.clone();
                let (Some(room_id), Some(peer)) =
                    (self.choose(&rooms).cloned(), self.choose(&peers).cloned())
                else {
                    return;
                };
                let body = self.next_body(peer.user_id.as_str());
                if self.server().post(&peer, &room_id, &body, None).is_ok() {
                    self.report.peer_posts += 1;
                }
            },
            Op::Send => {
                let Some(room_id) = self.driver.client().directory().active_room_id().cloned()
                else {
                    return;
                };
                let author = self.session.user_id.to_string();
                let body = self.next_body(&author);
                let draft = MessageDraft::text(room_id, body);
                if self.driver.intent(ClientEvent::SendMessage { draft }).is_ok() {
                    self.report.sent += 1;
                }
            },
            Op::SwitchRoom => {
                let rooms: Vec<RoomId> =
                    self.driver.client().all_rooms().map(|room| room.id.clone()).collect();
                if let Some(room_id) = self.choose(&rooms).cloned() {
                    let _ = self.driver.intent(ClientEvent::OpenRoom { room_id });
                }
            },
            Op::CloseRoom => {
                let _ = self.driver.intent(ClientEvent::CloseRoom);
            },
            Op::Deliver => {
                self.driver.deliver_one();
            },
            Op::Pump => {
                self.driver.pump_push();
            },
            Op::Tick => self.driver.tick(TICK),
            Op::Heartbeat => self.server().heartbeat(),
            Op::Disconnect => {
                self.server().disconnect_all();
                self.report.disconnects += 1;
            },
            Op::RetryOrDiscard => self.retry_or_discard(),
            Op::PeerCreatesRoom => {
                let peers = self.peers.clone();
                let Some(peer) = self.choose(&peers).cloned() else {
                    return;
                };
                let title = self.next_body("room");
                self.server().add_room(
                    &peer.user_id,
                    vec![self.session.user_id.clone()],
                    RoomKind::Group,
                    &title,
                );
            },
            Op::Garbage => {
                let raw = match self.rng.gen_range(0..3) {
                    0 => RawEvent::new("messages", "update", serde_json::Value::Null),
                    1 => RawEvent::new("rooms", "create", serde_json::json!({ "id": 7 })),
                    _ => RawEvent::new("rooms.r0001.messages", "typing", serde_json::json!({})),
                };
                self.server().publish_raw(&raw);
            },
            Op::ReloadRooms => {
                let _ = self.driver.intent(ClientEvent::ReloadRooms);
            },
        }
    }

    fn retry_or_discard(&mut self) {
        let failed: Vec<_> = self
            .driver
            .client()
            .timelines()
            .flat_map(|timeline| timeline.iter())
            .filter(|message| message.delivery_state == DeliveryState::Failed)
            .map(|message| message.id.clone())
            .collect();
        let Some(provisional_id) = self.choose(&failed).cloned() else {
            return;
        };
        if self.rng.gen_bool(0.5) {
            if self.driver.intent(ClientEvent::RetrySend { provisional_id }).is_ok() {
                self.report.sent += 1;
            }
        } else {
            let _ = self.driver.intent(ClientEvent::DiscardFailed { provisional_id });
        }
    }

    /// Bring everything to rest without chaos and compare with the server.
    fn converge(&mut self) {
        self.server().set_chaos(ChaosConfig::none());
        self.server().flush_held();

        let opened = self.driver.tick_until_open(TICK, Duration::from_secs(120));
        if !opened {
            self.report.divergence.push("push channel did not reopen".to_owned());
        }

        let _ = self.driver.intent(ClientEvent::ReloadRooms);
        if let Some(room_id) = self.driver.client().directory().active_room_id().cloned() {
            let _ = self.driver.intent(ClientEvent::ReloadHistory { room_id });
        }
        if !self.driver.run_until_quiet(64) {
            self.report.divergence.push("client did not settle".to_owned());
        }

        self.compare_directory();
        self.compare_active_timeline();
    }

    fn compare_directory(&mut self) {
        let client = self.driver.client();
        for room in self.driver.server().rooms_for(&self.session.user_id) {
            match client.directory().get(&room.id) {
                None => self.report.divergence.push(format!("room {} missing", room.id)),
                Some(local) if local.last_activity_at < room.last_activity_at => {
                    self.report.divergence.push(format!(
                        "room {}: activity {} behind server {}",
                        room.id, local.last_activity_at, room.last_activity_at
                    ));
                },
                Some(local) if local.last_activity_at > room.last_activity_at => {
                    self.report.divergence.push(format!(
                        "room {}: activity {} ahead of server {}",
                        room.id, local.last_activity_at, room.last_activity_at
                    ));
                },
                Some(_) => {},
            }
        }
    }

    fn compare_active_timeline(&mut self) {
        let client = self.driver.client();
        let Some(room_id) = client.directory().active_room_id() else {
            return;
        };

        let server_ids: Vec<_> =
            self.driver.server().messages(room_id).into_iter().map(|m| m.id).collect();
        let timeline: Vec<_> = client
            .timeline(room_id)
            .map(|timeline| timeline.iter().collect::<Vec<_>>())
            .unwrap_or_default();

        let mut local_ids: Vec<_> = timeline
            .iter()
            .filter(|m| m.delivery_state == DeliveryState::Confirmed)
            .map(|m| m.id.clone())
            .collect();
        local_ids.sort();
        let mut expected = server_ids;
        expected.sort();
        if local_ids != expected {
            self.report.divergence.push(format!(
                "room {room_id}: {} confirmed locally, {} on server",
                local_ids.len(),
                expected.len()
            ));
        }

        let pending =
            timeline.iter().filter(|m| m.delivery_state == DeliveryState::Pending).count();
        if pending > 0 {
            self.report.divergence.push(format!("room {room_id}: {pending} sends still pending"));
        }
    }
}

impl Scenario {
    /// Run the scenario to completion.
    pub fn run(&self) -> ScenarioReport {
        let env = SimEnv::with_seed(self.seed);
        let server = SimServer::new(env.clone(), self.seed.wrapping_add(1));
        let session = Session::new("student", "Student");
        let peers: Vec<Session> = (0..self.peers.max(1))
            .map(|i| Session::new(format!("peer{i}"), format!("Peer {i}")))
            .collect();

        let peer_ids: Vec<UserId> = peers.iter().map(|peer| peer.user_id.clone()).collect();
        for i in 0..self.initial_rooms {
            let kind = RoomKind::ALL[i % RoomKind::ALL.len()];
            server.add_room(&session.user_id, peer_ids.clone(), kind, &format!("Room {i}"));
        }
        server.set_chaos(self.chaos.clone());

        let client_env = env.with_wall_offset(self.chaos.client_clock_skew_ms);
        let driver = SimDriver::new(client_env, server, session.clone(), self.config.clone())
            .with_invariants(InvariantRegistry::standard());
        let mut run = Run {
            rng: ChaCha8Rng::seed_from_u64(self.seed.rotate_left(17)),
            driver,
            session,
            peers,
            report: ScenarioReport { seed: self.seed, steps: self.steps, ..Default::default() },
            counter: 0,
        };

        run.driver.start();
        for _ in 0..self.steps {
            let op = pick_op(&mut run.rng);
            run.step(op);
        }
        run.converge();

        run.report.unrecognized = run.driver.client().decode_stats().total_unrecognized();
        run.report.violations = run.driver.violations().to_vec();
        tracing::debug!(seed = self.seed, success = run.report.is_success(), "scenario finished");
        run.report
    }
}
