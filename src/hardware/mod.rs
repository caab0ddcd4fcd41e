//! Stage hardware: the motion HAL and simulated backends.

pub mod sim;
pub mod stage;

pub use self::sim::{SimAxis, SimAxisProbe, SimImager};
pub use self::stage::{Position, StageHal};
