pub mod config;
pub mod dispatch;
pub mod ids;
pub mod memory;
pub mod pending;
pub mod registry;
pub mod transport;
pub mod unified;

pub use config::MessengerConfig;
pub use memory::MemoryHub;
pub use registry::RemoteObject;
pub use registry::RemoteRegistry;
pub use transport::Transport;
pub use unified::CallError;
pub use unified::Delivery;
pub use unified::UnifiedMessenger;
