//! Neural-network autopilot for the station-approach game.
//!
//! The crate trains a small feed-forward controller to fly a craft to the
//! station while dodging the station's lead-predicted projectiles, using a
//! deterministic physics replica of the game as its fitness oracle. The
//! interactive rendering layer lives elsewhere; it consumes the types
//! re-exported below (sensor encoding, action decoding, craft state, run
//! status) and feeds nothing back into the core algorithms.

pub mod constants;
pub mod craft;
pub mod matrix;
pub mod model;
pub mod network;
pub mod rng;
pub mod sim;
pub mod trainer;

pub use craft::Craft;
pub use matrix::{Matrix, MatrixError};
pub use model::ModelError;
pub use network::{Activation, Layer, Network, TrainingExample};
pub use rng::SeededRng;
pub use sim::{
    build_sensor_input, decode_actions, Actions, Projectile, Simulation, SimulationResult, Status,
    VisualState,
};
pub use trainer::{CancelToken, TrainerConfig, TrainingSession, TrainingSummary};

/// Controller topology used by the game: 12 sensors, one hidden layer,
/// 4 bounded actions.
pub fn default_network(rng: &mut SeededRng) -> Network {
    Network::new(
        &[
            constants::SENSOR_INPUTS,
            constants::HIDDEN_NEURONS,
            constants::ACTION_OUTPUTS,
        ],
        rng,
    )
}
