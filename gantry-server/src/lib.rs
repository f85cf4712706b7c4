pub mod dispatcher;
pub mod ops;

pub use dispatcher::{dispatch_router, DispatchState};
pub use ops::{ops_router, OpsState};
