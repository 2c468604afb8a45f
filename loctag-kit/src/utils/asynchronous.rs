//! Asynchronous utilities for Loctag Kit.
//!
//! The kit is runtime-agnostic at its trait seams: clients hand back opaque
//! boxed futures/streams so callers don't depend on concrete types.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    future::{AbortHandle, Abortable, Future, abortable},
    stream::Stream,
};

/// Runs a future independently.
///
/// Uses the ambient tokio runtime when there is one.
///
/// **Note:** This function may spawn its own runtime if it can't find an
/// existing one, so the kit keeps working when driven from fully synchronous
/// code.
#[cfg(feature = "async-rt")]
pub fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    use std::sync::OnceLock;
    use tokio::runtime::{Builder, Handle, Runtime};

    static RUNTIME: OnceLock<Runtime> = OnceLock::new();

    if let Ok(handle) = Handle::try_current() {
        handle.spawn(fut);
    } else {
        log::warn!("No tokio runtime found. Creating a shared runtime.");
        let rt = RUNTIME.get_or_init(|| {
            Builder::new_multi_thread()
                .enable_io()
                .enable_time()
                .thread_name("loctag-kit-tokio")
                .build()
                .expect("Failed to create tokio runtime for Loctag Kit")
        });
        rt.spawn(fut);
    }
}

/// A handle that aborts its associated future when dropped.
///
/// Similar to https://docs.rs/tokio-util/latest/tokio_util/task/struct.AbortOnDropHandle.html
/// but runtime agnostic.
///
/// This is created from the [`abort_on_drop`] function.
pub struct AbortOnDropHandle(AbortHandle);

impl Drop for AbortOnDropHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

impl AbortOnDropHandle {
    /// Manually aborts the future associated with this handle before it is dropped.
    pub fn abort(&mut self) {
        self.0.abort();
    }
}

/// Constructs a future + [`AbortOnDropHandle`] pair.
///
/// See [`AbortOnDropHandle`] for more details.
pub fn abort_on_drop<F, T>(future: F) -> (Abortable<F>, AbortOnDropHandle)
where
    F: Future<Output = T> + Send + 'static,
{
    let (abort_handle, abort_registration) = abortable(future);
    (abort_handle, AbortOnDropHandle(abort_registration))
}

/// Opaque, boxed and pinned future commonly expected by traits in Loctag Kit.
///
/// Use [`kit_future`] to create an instance of this type.
pub struct KitFuture<'a, T>(Pin<Box<dyn Future<Output = T> + Send + 'a>>);
impl<'a, T> Future for KitFuture<'a, T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

/// Opaque, boxed and pinned stream commonly expected by traits in Loctag Kit.
///
/// Use [`kit_stream`] to create an instance of this type.
pub struct KitStream<'a, T>(Pin<Box<dyn Stream<Item = T> + Send + 'a>>);
impl<'a, T> Stream for KitStream<'a, T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.0).poll_next(cx)
    }
}

/// Wraps a future into a [`KitFuture`].
pub fn kit_future<'a, T>(future: impl Future<Output = T> + Send + 'a) -> KitFuture<'a, T> {
    KitFuture(Box::pin(future))
}

/// Wraps a stream into a [`KitStream`].
pub fn kit_stream<'a, T>(stream: impl Stream<Item = T> + Send + 'a) -> KitStream<'a, T> {
    KitStream(Box::pin(stream))
}
