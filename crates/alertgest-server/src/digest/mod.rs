pub mod delivery;
pub mod generator;

pub use delivery::{DeliveryCoordinator, DeliveryError, DeliveryOutcome};
pub use generator::{DigestGenerator, GenerationError, GeneratorSettings};
