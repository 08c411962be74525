pub mod change_status_command;
pub mod create_request_command;

pub use change_status_command::{
    ChangeRequestStatusCommand, LineAllocationInstruction, UpdatedRequest,
};
pub use create_request_command::CreateRequestCommand;
