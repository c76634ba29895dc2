//! Player-state records exchanged by the demo each tick.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rally_net::Message;
use serde::{Deserialize, Serialize};

/// Arena size in pixels.
pub const ARENA_WIDTH: f32 = 800.0;
pub const ARENA_HEIGHT: f32 = 600.0;

/// What one player tells the other every tick. Missing fields take defaults,
/// so older or partial records still decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerState {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub health: i32,
    pub weapon_idx: u32,
    pub shooting: bool,
    pub name: String,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            x: ARENA_WIDTH / 2.0,
            y: ARENA_HEIGHT / 2.0,
            angle: 0.0,
            health: 100,
            weapon_idx: 0,
            shooting: false,
            name: "Player".to_string(),
        }
    }
}

/// A bot that wanders around the arena.
pub struct Walker {
    pub state: PlayerState,
    speed: f32,
    rng: StdRng,
}

impl Walker {
    pub fn new(name: &str, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let state = PlayerState {
            x: rng.random_range(0.0..ARENA_WIDTH),
            y: rng.random_range(0.0..ARENA_HEIGHT),
            angle: rng.random_range(0.0..std::f32::consts::TAU),
            name: name.to_string(),
            ..Default::default()
        };
        Self {
            state,
            speed: 4.0,
            rng,
        }
    }

    /// Advance one tick.
    pub fn step(&mut self) {
        self.state.angle = (self.state.angle + self.rng.random_range(-0.3..0.3))
            .rem_euclid(std::f32::consts::TAU);
        self.state.x = (self.state.x + self.state.angle.cos() * self.speed).clamp(0.0, ARENA_WIDTH);
        self.state.y = (self.state.y + self.state.angle.sin() * self.speed).clamp(0.0, ARENA_HEIGHT);
        self.state.shooting = self.rng.random_bool(0.2);
        if self.rng.random_bool(0.02) {
            self.state.weapon_idx = (self.state.weapon_idx + 1) % 5;
        }
    }
}

/// Our picture of the other player, built from their updates.
#[derive(Debug, Default)]
pub struct RemoteView {
    /// Latest decoded state.
    pub latest: Option<PlayerState>,
    /// Valid updates applied so far.
    pub updates: u64,
    /// Updates that had `shooting` set.
    pub shots: u64,
    /// Payloads that were not valid player state.
    pub rejected: u64,
}

impl RemoteView {
    /// Apply one tick's worth of drained messages. Every record counts
    /// toward shots; only the newest one sets the position.
    pub fn apply_all(&mut self, messages: &[Message]) {
        for message in messages {
            match message.decode_json::<PlayerState>() {
                Ok(state) => {
                    self.updates += 1;
                    if state.shooting {
                        self.shots += 1;
                    }
                    self.latest = Some(state);
                }
                Err(e) => {
                    self.rejected += 1;
                    tracing::debug!("Ignoring malformed player state: {e}");
                }
            }
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.latest
            .as_ref()
            .map(|state| state.name.as_str())
            .filter(|name| !name.is_empty())
    }
}
