//! Shared tuning constants for the arena, the craft, the station's fire
//! control, and the fitness shaping. The simulator and the trainer both read
//! from here so a single edit retunes training and playback together.

// Arena
pub const ARENA_WIDTH: f32 = 800.0;
pub const ARENA_HEIGHT: f32 = 600.0;
pub const STATION_X: f32 = ARENA_WIDTH / 2.0;
pub const STATION_Y: f32 = ARENA_HEIGHT / 2.0;
/// Spawn inset from each arena edge, in pixels.
pub const SPAWN_EDGE_INSET: f32 = 50.0;

// Craft kinematics
pub const MAX_SPEED: f32 = 5.0;
pub const THRUST_POWER: f32 = 0.15;
pub const STRAFE_POWER: f32 = 0.10;
pub const DRAG_FACTOR: f32 = 0.98;
/// Degrees of heading change at full rotation output, per frame.
pub const ROTATION_RATE_DEG: f32 = 6.0;

// Station fire control
pub const PROJECTILE_FIRE_INTERVAL: u32 = 40;
pub const PROJECTILE_SPEED: f32 = 2.0;
pub const PROJECTILE_COLLISION_RADIUS: f32 = 10.0;
/// No projectiles are fired while the craft is this close to the station.
pub const SAFE_ZONE_RADIUS: f32 = 100.0;
/// How much the station leads the craft's velocity (0 = none, 1 = full lead).
pub const LEAD_PREDICTION_FACTOR: f32 = 0.7;
/// Cap on the lead-prediction horizon, in frames.
pub const LEAD_PREDICTION_MAX_FRAMES: f32 = 60.0;

// Episode scoring
pub const WIN_RADIUS: f32 = 50.0;
pub const MAX_SIM_FRAMES: u32 = 5_000;
pub const TIME_PENALTY_PER_FRAME: f32 = 0.15;
pub const DISTANCE_DELTA_WEIGHT: f32 = 0.2;
pub const WIN_REWARD: f32 = 100.0;
pub const HIT_PENALTY: f32 = 50.0;
pub const TIMEOUT_DISTANCE_WEIGHT: f32 = 0.3;
/// One-time end-of-run bonuses for the closest approach achieved:
/// (distance threshold in px, loss reduction).
pub const PROXIMITY_BONUSES: [(f32, f32); 4] =
    [(200.0, 5.0), (150.0, 10.0), (100.0, 20.0), (75.0, 30.0)];

// Network topology: 12 sensors in, 4 bounded actions out.
pub const SENSOR_INPUTS: usize = 12;
pub const ACTION_OUTPUTS: usize = 4;
pub const HIDDEN_NEURONS: usize = 16;

// Action dead zones (below these magnitudes the output is ignored)
pub const THRUST_DEAD_ZONE: f32 = 0.1;
pub const STRAFE_DEAD_ZONE: f32 = 0.1;
pub const ROTATION_DEAD_ZONE: f32 = 0.05;
pub const BRAKE_DEAD_ZONE: f32 = 0.1;

// Training defaults
pub const EXAMPLES_PER_BATCH: usize = 32;
pub const LEARNING_RATE: f32 = 0.01;
pub const TRAINING_TIME_SECONDS: u64 = 1_800;
pub const EVALUATION_INTERVAL_BATCHES: u64 = 100;
pub const VALIDATION_TESTS: usize = 5;
pub const VALIDATION_REQUIRED_WINS: usize = 3;
pub const VALIDATION_MAX_FRAMES: u32 = 2_000;
/// Default seed for weight initialization, kept fixed so training runs on the
/// same topology start from identical weights and stay comparable.
pub const WEIGHT_INIT_SEED: u32 = 42;
