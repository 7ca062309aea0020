// reelcircle-common: shared types and wire protocol for the ReelCircle workspace

pub mod protocol;
pub mod types;
