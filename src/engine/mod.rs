mod ammo;
mod load;
mod mt;
mod shot;

pub use ammo::{Ammunition, Sequencer};
pub use load::run_load;
pub use shot::ShotExecutor;
