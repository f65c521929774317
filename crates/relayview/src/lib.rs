pub mod error;
pub mod player;
pub mod ptz;
pub mod relay;
pub mod session;
pub mod state;
pub mod surface;
pub mod util;

pub use error::{PlayerError, PlayerResult};
pub use player::{Player, PlayerOptions, RelaySessionFactory, SessionFactory};
pub use ptz::{DeviceControl, HoldHandle, PtzCommand, PtzDispatcher, PtzHandler, PtzSettings};
pub use relay::{RelayClient, RelayEndpoints};
pub use session::{SessionContext, SessionPhase, TransportSession};
pub use state::{PlaybackMode, PlayerEvent, PlayerState};
pub use surface::{BufferEvent, BufferEvents, RecordingSurface, SourceBuffer, Surface};
pub use util::http::HttpClient;
