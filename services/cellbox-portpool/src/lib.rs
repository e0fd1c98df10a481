//! # cellbox-portpool
//!
//! Host port allocation for cellbox containers.
//!
//! A contiguous port range is split into a fixed number of equally sized
//! groups. Each group hands out ports independently, so tenants mapped to
//! different groups never compete for the same ports.
//!
//! ```text
//!  start                                             start + size
//!    │◄──────── group 0 ────────►│◄──────── group 1 ────────►│
//!    │ cursor ─► 1003 1004 ... 1049 1000 1001 1002 │ 1050 ...  │
//! ```
//!
//! Every group remembers where its allocation cursor stands. The cursor can
//! be captured with [`PortPool::refresh_state`] and written to disk with
//! [`save_state`], so that a restarted host process resumes handing out
//! ports after the last ones it issued instead of immediately reusing ports
//! whose previous leases may still be draining.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod pool;
pub mod state;

pub use error::{PortPoolError, Result};
pub use pool::{MAX_PORT, PortPool};
pub use state::{GroupState, PoolState, load_state, save_state};
