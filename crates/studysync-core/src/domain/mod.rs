//! Domain model (IDs, task kinds, resources, states, outcomes, time line).

pub mod ids;
pub mod outcome;
pub mod resource;
pub mod state;
pub mod task;
pub mod task_kind;
pub mod timeline;

pub use ids::TaskId;
pub use outcome::TaskOutcome;
pub use resource::ResourceKind;
pub use state::{ApiState, OnlineStatus};
pub use task::TaskDefinition;
pub use task_kind::{TaskKind, UnknownTaskKind};
pub use timeline::{TimeLine, TimeLineItem, top_of_hour, window_cutoff};
