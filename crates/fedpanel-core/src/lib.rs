pub mod command;
pub mod config;
pub mod error;
pub mod operation;

pub use command::{CommandDescriptor, ExecutionResult, ExecutionState, OutputChunk, OutputStream};
pub use config::Config;
pub use error::{ActionError, ErrorCause, ErrorKind, FedpanelError, Result};
pub use operation::{CapabilityCategory, OperationRequest, ParamValue};
