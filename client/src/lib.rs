pub mod assets;
pub mod engine;
pub mod reconciler;
pub mod session;
pub mod transport;

pub use assets::{AssetLoader, HttpAssetLoader, LoadedAsset, ManifestLoader, load_scene};
pub use engine::{ClockEngine, LocalEvent, PlaybackEngine};
pub use reconciler::{Cause, EngineCommand, IgnoreCounters, PlaybackReconciler};
pub use session::{PacketHub, PlaybackStatus, SessionManager};
pub use transport::{LinkSender, PacketSink, TransportError, TransportLink};
