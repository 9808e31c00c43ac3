pub mod change_request;
pub mod workflow;
