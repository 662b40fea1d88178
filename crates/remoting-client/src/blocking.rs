use remoting_common::{RemotingError, Result};
use std::future::Future;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Drives `future` to completion from synchronous code.
///
/// Inside a multi-thread runtime the worker is moved out of the scheduler with
/// `block_in_place`. Outside any runtime, `fallback` (usually the handle
/// captured when the client was built) runs the future.
pub(crate) fn block_on<F: Future>(fallback: Option<&Handle>, future: F) -> Result<F::Output> {
    match Handle::try_current() {
        Ok(current) => {
            if current.runtime_flavor() == RuntimeFlavor::CurrentThread {
                return Err(RemotingError::Configuration(
                    "Blocking calls are not supported on a current-thread runtime".to_string(),
                ));
            }
            Ok(tokio::task::block_in_place(|| current.block_on(future)))
        }
        Err(_) => match fallback {
            Some(handle) => Ok(handle.block_on(future)),
            None => Err(RemotingError::Configuration(
                "No tokio runtime available for a blocking call".to_string(),
            )),
        },
    }
}
