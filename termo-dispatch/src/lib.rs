pub mod api;
pub mod collector;
pub mod config;
pub mod edge;
pub mod link;
pub mod session;
pub mod state;
pub mod store;
pub mod watchdog;

pub use config::{Config, LinkConfig, ServerConfig, SessionSettings, StorageConfig};
pub use edge::mock::MockEdgeReceiver;
pub use edge::tcp::TcpEdgeReceiver;
pub use edge::udp::UdpEdgeReceiver;
pub use edge::{EdgeData, EdgeReceiver};
pub use link::{ChannelLink, DatagramLink, Link, LinkEvent, StreamLink, TransportError};
pub use session::{Admission, Arrival, SequenceAnomaly, Session, SessionConfig, SessionSnapshot};
pub use state::HostState;
pub use store::memory::MemoryStore;
pub use store::sqlite::SqliteStore;
pub use store::{IngestOutcome, SeriesStore};
