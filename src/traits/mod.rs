//! Hardware seams for the scan core.
//!
//! Backend-agnostic traits the planner and HAL are written against.
//! Implementations handle device-specific details (step emission, frame
//! readout); simulated backends live in [`crate::hardware::sim`].

pub mod axis;
pub mod imager;

pub use self::axis::{Axis, JogDirection, StepScale, TravelRange};
pub use self::imager::{Frame, Imager};
