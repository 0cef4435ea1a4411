pub mod poller;
pub mod session;

pub use poller::{Poller, Snapshot, SnapshotReceiver};
pub use session::{CounterTotal, Session, UpdateResults};
