pub mod service;

pub use service::{ActionService, ExecutionEvent, ServiceParts};
