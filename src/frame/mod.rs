pub mod builder;
pub mod fixed_buffer;
pub mod header;
pub mod reassembler;
