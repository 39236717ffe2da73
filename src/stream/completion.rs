//! One-shot completion signal polled without blocking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::util::{Error, IoMode, Result};

struct Shared<T> {
    done: AtomicBool,
    value: Mutex<Option<Result<T>>>,
}

/// Producer half. Dropping it unfulfilled completes the signal with an error.
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

/// Consumer half.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

/// Create a connected promise/completion pair.
pub fn pair<T>() -> (Promise<T>, Completion<T>) {
    let shared = Arc::new(Shared { done: AtomicBool::new(false), value: Mutex::new(None) });
    (Promise { shared: Some(shared.clone()) }, Completion { shared })
}

/// Run `task` inline or on the rayon pool, depending on `mode`.
pub fn dispatch<T, F>(mode: IoMode, task: F) -> Completion<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match mode {
        IoMode::Inline => Completion::ready(task()),
        IoMode::Background => {
            let (promise, completion) = pair();
            rayon::spawn(move || promise.fulfill(task()));
            completion
        }
    }
}

impl<T> Promise<T> {
    pub fn fulfill(mut self, value: Result<T>) {
        if let Some(shared) = self.shared.take() {
            Self::complete(&shared, value);
        }
    }

    fn complete(shared: &Shared<T>, value: Result<T>) {
        *shared.value.lock() = Some(value);
        shared.done.store(true, Ordering::Release);
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            Self::complete(&shared, Err(Error::other("background task dropped before completing")));
        }
    }
}

impl<T> Completion<T> {
    /// Already-completed signal.
    pub fn ready(value: Result<T>) -> Self {
        let (promise, completion) = pair();
        promise.fulfill(value);
        completion
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::Acquire)
    }

    /// Take the result if the producer has finished. Never blocks.
    pub fn try_take(&self) -> Option<Result<T>> {
        if !self.is_done() {
            return None;
        }
        self.shared.value.lock().take()
    }

    /// Busy-poll until done. Only for the synchronous fallback path.
    pub fn wait(self) -> Result<T> {
        loop {
            if let Some(value) = self.try_take() {
                return value;
            }
            if self.is_done() {
                return Err(Error::other("completion already taken"));
            }
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair() {
        let (promise, completion) = pair::<u32>();
        assert!(!completion.is_done());
        assert!(completion.try_take().is_none());
        promise.fulfill(Ok(7));
        assert!(completion.is_done());
        assert_eq!(completion.try_take().unwrap().unwrap(), 7);
        // Value is taken exactly once
        assert!(completion.try_take().is_none());
    }

    #[test]
    fn test_dropped_promise_completes_with_error() {
        let (promise, completion) = pair::<u32>();
        drop(promise);
        assert!(completion.try_take().unwrap().is_err());
    }

    #[test]
    fn test_dispatch_background() {
        let completion = dispatch(IoMode::Background, || Ok(21 * 2));
        assert_eq!(completion.wait().unwrap(), 42);
        let inline = dispatch(IoMode::Inline, || Ok("now"));
        assert!(inline.is_done());
    }
}
