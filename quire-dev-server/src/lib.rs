pub mod address;
pub mod bundle;
pub mod compiler;
pub mod coordinator;
pub mod error;
pub mod hot;
pub mod middleware;
pub mod server;
pub mod trigger;
pub mod watcher;

pub use address::{
    DEFAULT_PORT, HostBinding, NetworkResolutionError, Platform, PortFinder, ServerAddress,
    resolve_host, resolve_port,
};
pub use bundle::{Bundle, BundleConfig, BundleHook, BundleStore};
pub use compiler::{CompileError, Compiler, RenderCache};
pub use coordinator::{CoordinatorBuilder, PreUpdateObserver, RegenerationStats, UpdateCoordinator};
pub use error::{DevError, Result};
pub use hot::{HotMessage, HotReloader};
pub use middleware::{MiddlewareChain, MiddlewareStage};
pub use server::{DevOptions, DevServer};
pub use trigger::WatchTrigger;
pub use watcher::{SourceWatcher, WatchEvent, WatchScopes, subscribe_watchers};
