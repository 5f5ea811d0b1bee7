//! Reply text animation
//!
//! Deltas decoded off the response stream are queued here and revealed on a
//! [`TextSurface`], either all at once or typewriter-style one character per
//! tick. A reveal belongs to a single reply; starting a new one cancels
//! whatever is still in flight, so two replies can never interleave on the
//! surface.

mod surface;

pub use surface::{BufferSurface, TerminalSurface, TextSurface};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};

use crate::config::{AnimatorStrategy, RenderConfig};

struct RevealInner {
    /// Everything queued for reveal so far
    target: String,
    /// Byte offset into `target` already on the surface
    revealed: usize,
    /// No more text will arrive
    closed: bool,
}

struct RevealState {
    inner: Mutex<RevealInner>,
    wake: Notify,
}

/// One in-flight typewriter reveal
struct Reveal {
    state: Arc<RevealState>,
    done_rx: watch::Receiver<bool>,
    task: tokio::task::JoinHandle<()>,
}

/// Reveals reply text on a surface according to the configured strategy
pub struct TextAnimator {
    surface: Arc<dyn TextSurface>,
    strategy: AnimatorStrategy,
    interval: Duration,
    reveal: Option<Reveal>,
}

impl TextAnimator {
    #[must_use]
    pub fn new(surface: Arc<dyn TextSurface>, render: &RenderConfig) -> Self {
        Self {
            surface,
            strategy: render.animator,
            interval: render.typewriter_interval,
            reveal: None,
        }
    }

    /// Start a fresh reveal, canceling any still running
    pub fn begin(&mut self) {
        self.cancel();
        if self.strategy == AnimatorStrategy::Typewriter {
            self.reveal = Some(self.spawn_reveal());
        }
    }

    /// Queue a delta for reveal
    ///
    /// The immediate strategy shows it at once; the typewriter strategy
    /// paces it out one character per tick.
    pub fn push(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        match self.strategy {
            AnimatorStrategy::Immediate => self.surface.append(delta),
            AnimatorStrategy::Typewriter => {
                if self.reveal.is_none() {
                    self.reveal = Some(self.spawn_reveal());
                }
                if let Some(reveal) = &self.reveal {
                    reveal
                        .state
                        .inner
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .target
                        .push_str(delta);
                    reveal.state.wake.notify_one();
                }
            }
        }
    }

    /// Close the reveal and wait until everything queued is visible
    pub async fn finish(&mut self) {
        let Some(reveal) = self.reveal.take() else {
            return;
        };
        {
            let mut inner = reveal
                .state
                .inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            inner.closed = true;
        }
        reveal.state.wake.notify_one();

        let mut done_rx = reveal.done_rx;
        loop {
            if *done_rx.borrow_and_update() {
                break;
            }
            if done_rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Cancel any reveal and repaint the surface with the given text
    pub fn replace_now(&mut self, text: &str) {
        self.cancel();
        self.surface.replace(text);
    }

    fn spawn_reveal(&self) -> Reveal {
        let state = Arc::new(RevealState {
            inner: Mutex::new(RevealInner {
                target: String::new(),
                revealed: 0,
                closed: false,
            }),
            wake: Notify::new(),
        });
        let (done_tx, done_rx) = watch::channel(false);
        let task = tokio::spawn(run_reveal(
            Arc::clone(&state),
            Arc::clone(&self.surface),
            self.interval,
            done_tx,
        ));
        Reveal {
            state,
            done_rx,
            task,
        }
    }

    fn cancel(&mut self) {
        if let Some(reveal) = self.reveal.take() {
            reveal.task.abort();
        }
    }
}

impl Drop for TextAnimator {
    fn drop(&mut self) {
        self.cancel();
    }
}

enum Step {
    Emit(String),
    Wait,
    Done,
}

async fn run_reveal(
    state: Arc<RevealState>,
    surface: Arc<dyn TextSurface>,
    interval: Duration,
    done_tx: watch::Sender<bool>,
) {
    loop {
        let step = {
            let mut inner = state.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.revealed < inner.target.len() {
                let len = inner.target[inner.revealed..]
                    .chars()
                    .next()
                    .map_or(1, char::len_utf8);
                let delta = inner.target[inner.revealed..inner.revealed + len].to_string();
                inner.revealed += len;
                Step::Emit(delta)
            } else if inner.closed {
                Step::Done
            } else {
                Step::Wait
            }
        };

        match step {
            Step::Emit(delta) => {
                surface.append(&delta);
                tokio::time::sleep(interval).await;
            }
            Step::Wait => state.wake.notified().await,
            Step::Done => break,
        }
    }
    let _ = done_tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready};

    fn render_config(strategy: AnimatorStrategy) -> RenderConfig {
        RenderConfig {
            animator: strategy,
            typewriter_interval: Duration::from_millis(30),
        }
    }

    fn setup(strategy: AnimatorStrategy) -> (TextAnimator, BufferSurface) {
        let surface = BufferSurface::new();
        let animator = TextAnimator::new(Arc::new(surface.clone()), &render_config(strategy));
        (animator, surface)
    }

    #[tokio::test]
    async fn test_immediate_shows_deltas_at_once() {
        let (mut animator, surface) = setup(AnimatorStrategy::Immediate);
        animator.begin();
        animator.push("Hello ");
        animator.push("world");
        assert_eq!(surface.text(), "Hello world");
        animator.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_typewriter_reveals_everything_queued() {
        let (mut animator, surface) = setup(AnimatorStrategy::Typewriter);
        animator.begin();
        animator.push("ab");
        animator.push("cd");
        animator.finish().await;
        assert_eq!(surface.text(), "abcd");
    }

    #[tokio::test(start_paused = true)]
    async fn test_typewriter_reveals_one_unit_per_tick() {
        let (mut animator, surface) = setup(AnimatorStrategy::Typewriter);
        animator.begin();
        animator.push("abc");

        tokio::task::yield_now().await;
        assert_eq!(surface.text(), "a");

        tokio::time::sleep(Duration::from_millis(31)).await;
        assert_eq!(surface.text(), "ab");
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_waits_for_queued_text() {
        let (mut animator, surface) = setup(AnimatorStrategy::Typewriter);
        animator.begin();
        animator.push("ab");

        let mut finish = tokio_test::task::spawn(animator.finish());
        assert_pending!(finish.poll());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_ready!(finish.poll());
        drop(finish);

        assert_eq!(surface.text(), "ab");
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_now_cancels_reveal() {
        let (mut animator, surface) = setup(AnimatorStrategy::Typewriter);
        animator.begin();
        animator.push("abcdef");

        animator.replace_now("something went wrong");
        assert_eq!(surface.text(), "something went wrong");

        animator.finish().await;
        assert_eq!(surface.text(), "something went wrong");
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_cancels_previous_reveal() {
        let (mut animator, surface) = setup(AnimatorStrategy::Typewriter);
        animator.begin();
        animator.push("first");

        animator.begin();
        animator.push("second");
        animator.finish().await;

        assert_eq!(surface.text(), "second");
    }

    #[tokio::test]
    async fn test_finish_without_reveal_returns_immediately() {
        let (mut animator, surface) = setup(AnimatorStrategy::Typewriter);
        animator.finish().await;
        assert_eq!(surface.text(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_multibyte_units_stay_whole() {
        let (mut animator, surface) = setup(AnimatorStrategy::Typewriter);
        animator.begin();
        animator.push("héllo");
        animator.finish().await;
        assert_eq!(surface.text(), "héllo");
    }
}
