//! Generator and discriminator networks.

pub mod discriminator;
pub mod generator;
pub mod layers;

pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use generator::{Generator, GeneratorConfig};
pub use layers::{ForwardMode, LayerSpec};
