//! Physics-only replica of the station-approach game, used as the fitness
//! oracle during training and as the state source for real-time playback.
//!
//! The simulation owns its entire world (craft, projectiles, counters); it
//! never aliases interactive game state. Given a seed and a frozen network,
//! a run is bit-for-bit deterministic.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::craft::Craft;
use crate::matrix::{Matrix, MatrixError};
use crate::network::Network;
use crate::rng::SeededRng;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projectile {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

/// Outcome of one full simulation run; lower loss is better.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub won: bool,
    pub hit: bool,
    pub total_loss: f32,
    pub frames_played: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Running,
    Won,
    Lost,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Won => write!(f, "won"),
            Self::Lost => write!(f, "lost"),
        }
    }
}

/// Discrete sprite classification for the rendering layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisualState {
    Idle,
    Boosting,
    TurningLeft,
    TurningRight,
}

/// The four bounded controller outputs after decoding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Actions {
    /// 0..1, forward acceleration along the heading.
    pub thrust: f32,
    /// -1..+1, lateral acceleration (negative = left).
    pub strafe: f32,
    /// -1..+1, heading change this frame (scaled by the rotation rate).
    pub rotation: f32,
    /// 0..1, extra drag on top of the constant per-frame drag.
    pub brake: f32,
}

#[derive(Clone, Debug)]
pub struct Simulation {
    craft: Craft,
    projectiles: Vec<Projectile>,
    fire_counter: u32,
    frames_played: u32,
    total_loss: f32,
    previous_distance: f32,
    closest_distance: f32,
    status: Status,
    visual: VisualState,
}

impl Simulation {
    /// Start a run with the craft on a uniformly chosen arena edge at a
    /// uniform offset, zero velocity, heading north.
    pub fn new(seed: u32) -> Self {
        let mut rng = SeededRng::new(seed);
        let edge = rng.next_range(0, 4);
        let along_x = rng.next_f32_range(SPAWN_EDGE_INSET, ARENA_WIDTH - SPAWN_EDGE_INSET);
        let along_y = rng.next_f32_range(SPAWN_EDGE_INSET, ARENA_HEIGHT - SPAWN_EDGE_INSET);
        let (x, y) = match edge {
            0 => (along_x, SPAWN_EDGE_INSET),
            1 => (along_x, ARENA_HEIGHT - SPAWN_EDGE_INSET),
            2 => (SPAWN_EDGE_INSET, along_y),
            _ => (ARENA_WIDTH - SPAWN_EDGE_INSET, along_y),
        };
        Self::with_craft(Craft::new(x, y))
    }

    /// Start from an explicit craft state; used by tests and by playback
    /// scenarios that restart from a fixed position.
    pub fn with_craft(craft: Craft) -> Self {
        let distance = craft.distance_to(STATION_X, STATION_Y);
        Self {
            craft,
            projectiles: Vec::new(),
            fire_counter: 0,
            frames_played: 0,
            total_loss: 0.0,
            previous_distance: distance,
            closest_distance: distance,
            status: Status::Running,
            visual: VisualState::Idle,
        }
    }

    pub fn craft(&self) -> &Craft {
        &self.craft
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn visual_state(&self) -> VisualState {
        self.visual
    }

    pub fn frames_played(&self) -> u32 {
        self.frames_played
    }

    /// Advance one frame under the given controller. Returns the status after
    /// the frame; once terminal, further calls are no-ops.
    pub fn step(&mut self, network: &Network) -> Result<Status, MatrixError> {
        if self.status != Status::Running {
            return Ok(self.status);
        }

        // 1. Station fire control: count up, then fire one lead-predicted
        //    projectile when the craft is outside the safe zone.
        self.fire_counter += 1;
        if self.fire_counter > PROJECTILE_FIRE_INTERVAL
            && self.craft.distance_to(STATION_X, STATION_Y) > SAFE_ZONE_RADIUS
        {
            if let Some(projectile) = aim_at_craft(&self.craft) {
                self.projectiles.push(projectile);
            }
            self.fire_counter = 0;
        }

        // 2. Advance projectiles with screen wrap.
        for projectile in &mut self.projectiles {
            projectile.x += projectile.vx;
            projectile.y += projectile.vy;
            if projectile.x < 0.0 {
                projectile.x += ARENA_WIDTH;
            } else if projectile.x > ARENA_WIDTH {
                projectile.x -= ARENA_WIDTH;
            }
            if projectile.y < 0.0 {
                projectile.y += ARENA_HEIGHT;
            } else if projectile.y > ARENA_HEIGHT {
                projectile.y -= ARENA_HEIGHT;
            }
        }

        // 3. Terminal hit test.
        for projectile in &self.projectiles {
            let dx = projectile.x - self.craft.x;
            let dy = projectile.y - self.craft.y;
            if (dx * dx + dy * dy).sqrt() < PROJECTILE_COLLISION_RADIUS {
                self.status = Status::Lost;
                return Ok(self.status);
            }
        }

        // 4-5. Sense, decide, act.
        let sensors = build_sensor_input(&self.craft, &self.projectiles);
        let decision = network.predict(&sensors)?;
        let actions = decode_actions(&decision);
        self.apply_actions(actions);

        // 6. Kinematics: clamp, move, wrap.
        self.craft.clamp_speed(MAX_SPEED);
        self.craft.integrate();
        self.craft.wrap_to_arena();

        // 7. Shaped loss.
        let current_distance = self.craft.distance_to(STATION_X, STATION_Y);
        self.total_loss += TIME_PENALTY_PER_FRAME;
        self.total_loss += (current_distance - self.previous_distance) * DISTANCE_DELTA_WEIGHT;
        if current_distance < self.closest_distance {
            self.closest_distance = current_distance;
        }
        if current_distance < WIN_RADIUS {
            self.total_loss -= WIN_REWARD;
            self.status = Status::Won;
            return Ok(self.status);
        }

        self.previous_distance = current_distance;
        self.frames_played += 1;
        Ok(self.status)
    }

    fn apply_actions(&mut self, actions: Actions) {
        if actions.thrust > THRUST_DEAD_ZONE {
            self.craft.thrust(actions.thrust * THRUST_POWER);
        }
        if actions.strafe.abs() > STRAFE_DEAD_ZONE {
            self.craft
                .strafe(actions.strafe.signum(), actions.strafe.abs() * STRAFE_POWER);
        }
        if actions.rotation.abs() > ROTATION_DEAD_ZONE {
            self.craft.rotate_by(actions.rotation * ROTATION_RATE_DEG);
        }
        self.craft.apply_drag(DRAG_FACTOR);
        if actions.brake > BRAKE_DEAD_ZONE {
            self.craft.apply_drag(1.0 - actions.brake * 0.1);
        }

        self.visual = if actions.thrust > THRUST_DEAD_ZONE {
            VisualState::Boosting
        } else if actions.rotation < -ROTATION_DEAD_ZONE {
            VisualState::TurningLeft
        } else if actions.rotation > ROTATION_DEAD_ZONE {
            VisualState::TurningRight
        } else {
            VisualState::Idle
        };
    }

    /// Fold the one-time terminal terms into the running loss and produce the
    /// fitness result.
    fn into_result(self) -> SimulationResult {
        let won = self.status == Status::Won;
        let hit = self.status == Status::Lost;
        let mut total_loss = self.total_loss;

        // End-of-run bonus for the closest approach achieved, one tier at a
        // time so deeper approaches stack.
        for (threshold, bonus) in PROXIMITY_BONUSES {
            if self.closest_distance < threshold {
                total_loss -= bonus;
            }
        }
        if !won && !hit {
            total_loss += self.previous_distance * TIMEOUT_DISTANCE_WEIGHT;
        }
        if hit {
            total_loss += HIT_PENALTY;
        }

        SimulationResult {
            won,
            hit,
            total_loss,
            frames_played: self.frames_played,
        }
    }

    /// Run a full episode: step until win, hit, or the frame cap.
    pub fn run(
        network: &Network,
        seed: u32,
        max_frames: u32,
    ) -> Result<SimulationResult, MatrixError> {
        let sim = Simulation::new(seed);
        sim.run_to_completion(network, max_frames)
    }

    fn run_to_completion(
        mut self,
        network: &Network,
        max_frames: u32,
    ) -> Result<SimulationResult, MatrixError> {
        while self.status == Status::Running && self.frames_played < max_frames {
            self.step(network)?;
        }
        Ok(self.into_result())
    }
}

/// Spawn one projectile at the station aimed at the craft's lead-predicted
/// position. Returns `None` only if the craft sits exactly on the station.
fn aim_at_craft(craft: &Craft) -> Option<Projectile> {
    let dx = craft.x - STATION_X;
    let dy = craft.y - STATION_Y;
    let distance = (dx * dx + dy * dy).sqrt();
    if distance <= 0.0 {
        return None;
    }

    let time_to_hit = (distance / PROJECTILE_SPEED).min(LEAD_PREDICTION_MAX_FRAMES);
    let predicted_x = craft.x + craft.vx * time_to_hit * LEAD_PREDICTION_FACTOR;
    let predicted_y = craft.y + craft.vy * time_to_hit * LEAD_PREDICTION_FACTOR;

    let pdx = predicted_x - STATION_X;
    let pdy = predicted_y - STATION_Y;
    let predicted_distance = (pdx * pdx + pdy * pdy).sqrt();
    if predicted_distance <= 0.0 {
        return None;
    }

    Some(Projectile {
        x: STATION_X,
        y: STATION_Y,
        vx: (pdx / predicted_distance) * PROJECTILE_SPEED,
        vy: (pdy / predicted_distance) * PROJECTILE_SPEED,
    })
}

/// Build the fixed 12-scalar sensor vector the controller consumes. Exposed
/// so the interactive layer feeds its own world through the same encoding.
pub fn build_sensor_input(craft: &Craft, projectiles: &[Projectile]) -> Matrix {
    let station_dx = STATION_X - craft.x;
    let station_dy = STATION_Y - craft.y;
    let station_distance = (station_dx * station_dx + station_dy * station_dy).sqrt();
    let station_angle = station_dy.atan2(station_dx);

    let mut closest_distance = 1_000.0f32;
    let mut closest_angle = 0.0f32;
    let mut closest_vx = 0.0f32;
    let mut closest_vy = 0.0f32;
    for projectile in projectiles {
        let dx = projectile.x - craft.x;
        let dy = projectile.y - craft.y;
        let distance = (dx * dx + dy * dy).sqrt();
        if distance < closest_distance {
            closest_distance = distance;
            closest_angle = dy.atan2(dx);
            closest_vx = projectile.vx;
            closest_vy = projectile.vy;
        }
    }

    Matrix::from_row(&[
        craft.x / ARENA_WIDTH,
        craft.y / ARENA_HEIGHT,
        craft.vx / 10.0,
        craft.vy / 10.0,
        craft.heading_deg / 360.0,
        station_distance / 500.0,
        station_angle / core::f32::consts::PI,
        closest_distance / 500.0,
        closest_angle / core::f32::consts::PI,
        closest_vx / 10.0,
        closest_vy / 10.0,
        projectiles.len() as f32 / 10.0,
    ])
}

/// Decode the network's 4 tanh outputs into bounded actions. Thrust and brake
/// are remapped from [-1, 1] to [0, 1]; strafe and rotation stay signed.
///
/// `decision` must be the 1x4 action row a controller produces; indexing
/// panics on anything narrower.
pub fn decode_actions(decision: &Matrix) -> Actions {
    Actions {
        thrust: ((decision.get(0, 0) + 1.0) / 2.0).clamp(0.0, 1.0),
        strafe: decision.get(0, 1).clamp(-1.0, 1.0),
        rotation: decision.get(0, 2).clamp(-1.0, 1.0),
        brake: ((decision.get(0, 3) + 1.0) / 2.0).clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_network() -> Network {
        let mut rng = SeededRng::new(WEIGHT_INIT_SEED);
        Network::new(&[SENSOR_INPUTS, HIDDEN_NEURONS, ACTION_OUTPUTS], &mut rng)
    }

    #[test]
    fn identical_seeds_produce_identical_results() {
        let network = test_network();
        let a = Simulation::run(&network, 0xC0FFEE, 600).unwrap();
        let b = Simulation::run(&network, 0xC0FFEE, 600).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_spawn_at_different_positions() {
        let a = Simulation::new(1);
        let b = Simulation::new(2);
        assert!(a.craft().x != b.craft().x || a.craft().y != b.craft().y);
    }

    #[test]
    fn spawn_inside_win_radius_wins_immediately() {
        let network = test_network();
        let craft = Craft::new(STATION_X, STATION_Y - (WIN_RADIUS - 1.0));
        let sim = Simulation::with_craft(craft);
        let result = sim.run_to_completion(&network, MAX_SIM_FRAMES).unwrap();
        assert!(result.won);
        assert!(!result.hit);
        assert!(result.frames_played <= 1, "frames={}", result.frames_played);
        assert!(result.total_loss < 0.0, "loss={}", result.total_loss);
    }

    #[test]
    fn projectile_on_craft_terminates_at_frame_of_impact() {
        let network = test_network();
        let craft = Craft::new(SPAWN_EDGE_INSET, SPAWN_EDGE_INSET);
        let mut sim = Simulation::with_craft(craft);
        sim.projectiles.push(Projectile {
            x: sim.craft.x,
            y: sim.craft.y,
            vx: 0.0,
            vy: 0.0,
        });
        let result = sim.run_to_completion(&network, MAX_SIM_FRAMES).unwrap();
        assert!(result.hit);
        assert!(!result.won);
        assert_eq!(result.frames_played, 0);
    }

    #[test]
    fn hit_adds_flat_penalty() {
        let network = test_network();
        let craft = Craft::new(SPAWN_EDGE_INSET, SPAWN_EDGE_INSET);
        let mut sim = Simulation::with_craft(craft);
        sim.projectiles.push(Projectile {
            x: sim.craft.x,
            y: sim.craft.y,
            vx: 0.0,
            vy: 0.0,
        });
        let result = sim.run_to_completion(&network, MAX_SIM_FRAMES).unwrap();
        assert_eq!(result.total_loss, HIT_PENALTY);
    }

    #[test]
    fn station_fires_only_outside_safe_zone() {
        let network = test_network();

        // Inside the safe zone: counter past the threshold, still no shot.
        let craft = Craft::new(STATION_X + SAFE_ZONE_RADIUS - 40.0, STATION_Y);
        let mut inside = Simulation::with_craft(craft);
        inside.fire_counter = PROJECTILE_FIRE_INTERVAL;
        inside.step(&network).unwrap();
        assert!(inside.projectiles.is_empty());

        // Outside: same counter, exactly one projectile at projectile speed.
        let mut outside = Simulation::with_craft(Craft::new(SPAWN_EDGE_INSET, SPAWN_EDGE_INSET));
        outside.fire_counter = PROJECTILE_FIRE_INTERVAL;
        outside.step(&network).unwrap();
        assert_eq!(outside.projectiles.len(), 1);
        let projectile = &outside.projectiles[0];
        let speed = (projectile.vx * projectile.vx + projectile.vy * projectile.vy).sqrt();
        assert!((speed - PROJECTILE_SPEED).abs() < 1e-4);
    }

    #[test]
    fn timeout_charges_remaining_distance() {
        let network = test_network();
        let craft = Craft::new(SPAWN_EDGE_INSET, SPAWN_EDGE_INSET);
        let sim = Simulation::with_craft(craft);
        // Zero frames: the run ends before anything happens and the timeout
        // penalty is proportional to the spawn distance.
        let distance = sim.previous_distance;
        let result = sim.run_to_completion(&network, 0).unwrap();
        assert!(!result.won && !result.hit);
        assert_eq!(result.total_loss, distance * TIMEOUT_DISTANCE_WEIGHT);
    }

    #[test]
    fn sensor_vector_has_fixed_width() {
        let craft = Craft::new(100.0, 100.0);
        let sensors = build_sensor_input(&craft, &[]);
        assert_eq!(sensors.shape(), (1, SENSOR_INPUTS));
    }

    #[test]
    fn status_displays_lowercase_words() {
        assert_eq!(Status::Running.to_string(), "running");
        assert_eq!(Status::Won.to_string(), "won");
        assert_eq!(Status::Lost.to_string(), "lost");
    }
}
