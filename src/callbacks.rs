//! Caller-facing callbacks and the guard that enforces a single terminal
//! signal per stream.

use crate::types::CompletionEvent;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Receiver of one stream's events.
///
/// Exactly one of `on_complete`/`on_error` is called per stream that is not
/// cancelled, and nothing is called after it.
pub trait CompletionCallbacks: Send + 'static {
    fn on_change(&mut self, text: &str);
    fn on_complete(&mut self);
    fn on_error(&mut self, message: &str);
}

pub type TextFn = Box<dyn FnMut(&str) + Send>;
pub type DoneFn = Box<dyn FnMut() + Send>;

/// Closure-backed [`CompletionCallbacks`]. Unset hooks are no-ops.
#[derive(Default)]
pub struct Callbacks {
    on_change: Option<TextFn>,
    on_complete: Option<DoneFn>,
    on_error: Option<TextFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_change(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_change = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl CompletionCallbacks for Callbacks {
    fn on_change(&mut self, text: &str) {
        if let Some(f) = self.on_change.as_mut() {
            f(text);
        }
    }

    fn on_complete(&mut self) {
        if let Some(f) = self.on_complete.as_mut() {
            f();
        }
    }

    fn on_error(&mut self, message: &str) {
        if let Some(f) = self.on_error.as_mut() {
            f(message);
        }
    }
}

/// Lifecycle of one `stream` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }
}

/// Routes events to callbacks while tracking [`StreamState`].
///
/// The state is moved before a callback runs, so a terminal callback can
/// never be followed by another one. The cancellation token is checked
/// before every callback.
pub(crate) struct Dispatcher<C> {
    callbacks: C,
    state: StreamState,
    cancel: CancellationToken,
}

impl<C: CompletionCallbacks> Dispatcher<C> {
    pub(crate) fn new(callbacks: C, cancel: CancellationToken) -> Self {
        Self {
            callbacks,
            state: StreamState::Idle,
            cancel,
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        self.state
    }

    /// Move to a non-terminal state. Ignored once terminal.
    pub(crate) fn advance(&mut self, next: StreamState) {
        if !self.state.is_terminal() {
            self.state = next;
        }
    }

    fn live(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if self.cancel.is_cancelled() {
            self.state = StreamState::Cancelled;
            return false;
        }
        true
    }

    pub(crate) fn dispatch(&mut self, event: CompletionEvent) {
        if !self.live() {
            debug!(
                "Dropping {} event after stream ended ({:?})",
                event.name(),
                self.state
            );
            return;
        }
        match event {
            CompletionEvent::Completion { completion } => self.callbacks.on_change(&completion),
            CompletionEvent::Error { error } => self.fail(&error),
            CompletionEvent::Done => self.complete(),
        }
    }

    pub(crate) fn complete(&mut self) {
        if self.live() {
            self.state = StreamState::Completed;
            self.callbacks.on_complete();
        }
    }

    pub(crate) fn fail(&mut self, message: &str) {
        if self.live() {
            self.state = StreamState::Errored;
            self.callbacks.on_error(message);
        }
    }

    pub(crate) fn cancelled(&mut self) {
        if !self.state.is_terminal() {
            self.state = StreamState::Cancelled;
        }
    }
}
