// sprint-core: Reactive view-model layer between data sources and platform adapters.

pub mod action;
pub mod bus;
pub mod config;
pub mod error;
pub mod gate;
pub mod list;
pub mod model;
pub mod paged;
pub mod property;
pub mod signal;
pub mod view_model;

// ── Primary re-exports ──────────────────────────────────────────────
pub use action::Action;
pub use bus::{ErrorBus, ErrorSink, LoadingBranch, LoadingBus};
pub use config::ViewModelConfig;
pub use error::{ActionError, BusError, PresentableError, SharedError, ViewModelError};
pub use gate::{ActivityGate, ActivityStream};
pub use list::{ArrayViewModel, ItemList};
pub use model::{Deletable, Fetchable, ModelViewModel, Saveable};
pub use paged::{FetchPhase, FetchResult, FetchedPage, Items, PaginatedFetchEngine};
pub use property::{MutableProperty, Property};
pub use signal::{Pipe, Signal, forward_while_active, throttle_while_inactive};
pub use view_model::ViewModel;
