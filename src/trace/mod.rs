pub mod event;
pub mod stats;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use self::event::HeapEvent;

/// Callback for heap events delivered in stream order.
pub type EventHandler = Box<dyn Fn(HeapEvent) + Send + Sync>;

/// Callback for trace source errors.
pub type ErrorHandler = Box<dyn Fn(anyhow::Error) + Send + Sync>;

/// TraceSource manages the OS-level heap instrumentation of one target
/// process and delivers its event stream.
///
/// The ordering contract matters: a stack capture is delivered immediately
/// after the allocation it belongs to, on the same thread, with no
/// structural link between the two. Implementations must preserve stream
/// order when invoking the event handler.
pub trait TraceSource: Send {
    /// Attach to the target process and start delivering events until the
    /// token is cancelled.
    fn start(
        &mut self,
        ctx: CancellationToken,
        pid: u32,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Detach from the target process and stop delivery.
    fn stop(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Register a handler for heap events.
    fn on_event(&mut self, handler: EventHandler);

    /// Register a handler for source-level errors.
    fn on_error(&mut self, handler: ErrorHandler);
}
