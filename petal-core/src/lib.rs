//! # petal-core
//!
//! Per-petal anticollision move scheduler for the fiber-positioner focal
//! plane. One petal carries ~500 two-axis positioners on a hexagonal grid
//! with overlapping reach zones; before each exposure every requested
//! positioner must slew to its target without any two arms touching each
//! other or the fixed petal/GFA keepouts.
//!
//! Pipeline per batch:
//!
//! 1. [`Petal::begin_schedule`] snapshots the arena state
//! 2. `request_*` calls transform targets and register deltas
//! 3. [`Petal::schedule_moves`] builds quantized move tables, checks target
//!    feasibility, and runs the path-adjustment loop until the whole batch
//!    sweeps collision-free
//! 4. [`Petal::send_and_execute_moves`] validates and emits hardware tables
//!    in one synchronous transport round trip, then updates stored positions
//!    from the cleanup views of confirmed positioners
//!
//! Scheduling is single-threaded and deterministic: identical inputs produce
//! bit-identical hardware tables.

pub mod animator;
pub mod collider;
pub mod constants;
pub mod errors;
pub mod model;
pub mod move_table;
pub mod petal;
pub mod schedule;
pub mod state;
pub mod stats;
pub mod transforms;
pub mod transport;

pub use animator::{Animator, ItemStyle};
pub use collider::{Collider, ColliderConfig, FixedKind, Sweep, Timeline};
pub use errors::{BatchError, PosError, RequestError};
pub use model::{ClampLimits, MoveFlags, PosModel, SubmoveList};
pub use move_table::{CleanupView, MoveTable, ScheduleView};
pub use petal::{ExecuteSummary, Petal, PetalConfig};
pub use schedule::{
    AnticollisionMode, HomingAxis, MoveCommand, PosSchedule, ScheduleOutcome, MAX_ADJUST_ITERS,
};
pub use state::{MemoryStateStore, PosState, StateStore};
pub use stats::{AdjustMethod, SchedStats};
pub use transforms::{PetalTransform, PosTransforms, RangeLimits, TransformError};
pub use transport::{NullTransport, PetalTransport, DEFAULT_SEND_TIMEOUT};
