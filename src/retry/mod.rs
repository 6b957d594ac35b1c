/*!
 * Retry Layer
 * Deferred replay of descriptor-acquiring calls under EMFILE/ENFILE
 */

mod graceful;
mod queue;
mod stream;

pub use graceful::GracefulFs;
pub use queue::{Completion, Invocation, RetryQueue};
pub use stream::{
    FileReadStream, FileWriteStream, ReadStream, ReadStreamOptions, StreamEvent, StreamState,
    WriteStream, WriteStreamOptions,
};
