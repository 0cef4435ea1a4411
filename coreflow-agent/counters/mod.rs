pub mod events;
pub mod io;
pub mod power;
pub mod sample;
pub mod sampler;

pub use events::{CounterProgram, EventFlags, EventSelectSpec};
pub use io::{CounterIo, CounterSlot};
pub use power::{EnergyReading, PowerPlane, PowerReader};
pub use sample::{counter_delta, CounterWidths, RawSample};
pub use sampler::Sampler;
