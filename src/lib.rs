//! A fire-and-forget messaging transport that replicates messages to a set of peer nodes over
//!  UDP. Each message consists of a topic and a property bag; it is encoded into a payload, split
//!  into a sequence of frames that each fit into a single datagram, and sent to every peer that
//!  the application's destination resolver returns (except the local node).
//!
//! ## Design goals
//!
//! * The abstraction is posting *messages* to all peers, not point-to-point streams
//! * No IP-level fragmentation: frames are at most `package_length` bytes, which is configured
//!   rather than discovered
//! * No handshake, acknowledgement or retransmission. Frames that are lost cause the message to be
//!   dropped on the receiving side after a timeout
//! * Sending to one peer does not wait for, or fail because of, other peers
//!   * each destination is handled by a separate send job
//!   * a bounded number of jobs runs concurrently, and if all slots are taken, the task calling
//!     `post()` runs the job itself. This throttles producers instead of queueing without bound
//! * Messages are reassembled on the receiving side regardless of the order in which frames
//!   arrive
//!
//! ## Frames
//!
//! All numbers are in network byte order (BE). Every frame starts with a generic prefix:
//!
//! ```ascii
//!  0: magic marker "DGRM" (4 bytes)
//!  4: correlation id (16 bytes, random UUID) - shared by all frames of a message
//! 20: prefix code (u8): 1 = START, 2 = DATA
//! 21: continuation flag (u8): 0 = last frame of the message, 1 = more frames follow
//! ```
//!
//! The first frame of each message is a START frame, followed by the topic:
//!
//! ```ascii
//! 22: topic length (u16)
//! 24: topic (UTF-8), followed by a 0 byte. An empty topic has neither bytes nor terminator
//!  *: payload slice
//! ```
//!
//! All other frames are DATA frames with a counter that starts at 2 and increases by one per frame:
//!
//! ```ascii
//! 22: counter (u16)
//! 24: payload slice
//! ```
//!
//! All frames except the last are exactly `package_length` bytes long. The last frame ends with
//!  the payload, i.e. the datagram's length delimits the final payload slice.

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod message;
pub mod message_handler;
pub mod receiver;
pub mod transport;
pub mod util;
