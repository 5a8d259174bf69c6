pub mod destination;
pub mod executor;
pub mod send_job;
pub mod send_socket;
