//! Animation runner
//!
//! Owns the single actuator slot. Starting a pattern first stops and joins
//! whatever is running, so two renderers never drive the strip at once.

use futures::FutureExt;
use light_edge_shared::defaults;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::patterns::{RenderContext, RenderFn};
use super::strip::{PixelSink, RenderFault, Strip};

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How long a renderer gets to honour a stop request before it is aborted
    pub grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(defaults::STOP_GRACE_MS),
        }
    }
}

/// The animation currently occupying the slot
struct ActuatorTask {
    pattern: String,
    alive: Arc<AtomicBool>,
    fault: Arc<OnceLock<RenderFault>>,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActuatorTask {
    fn is_faulted(&self) -> bool {
        self.fault.get().is_some()
    }
}

/// Marks a renderer as running for exactly as long as its task exists
struct LiveGuard {
    alive: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
}

impl LiveGuard {
    fn new(alive: Arc<AtomicBool>, live: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = live.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        alive.store(true, Ordering::SeqCst);
        Self { alive, live }
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub struct AnimationRunner {
    strip: Strip,
    grace: Duration,
    shutdown: CancellationToken,
    active: Option<ActuatorTask>,
    faults: Arc<Notify>,
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl AnimationRunner {
    pub fn new(
        sink: Arc<dyn PixelSink>,
        config: RunnerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            strip: Strip::new(sink),
            grace: config.grace,
            shutdown,
            active: None,
            faults: Arc::new(Notify::new()),
            live: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Signalled whenever a renderer faults; see [`take_fault`](Self::take_fault)
    pub fn fault_notifier(&self) -> Arc<Notify> {
        self.faults.clone()
    }

    /// True while a renderer task is still executing
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map(|task| task.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Pattern occupying the slot: running, or a static one that finished.
    /// A faulted renderer does not count.
    pub fn current(&self) -> Option<&str> {
        self.active
            .as_ref()
            .filter(|task| !task.is_faulted())
            .map(|task| task.pattern.as_str())
    }

    /// Clear the slot if its renderer faulted, returning the pattern and fault
    pub fn take_fault(&mut self) -> Option<(String, RenderFault)> {
        let fault = self.active.as_ref()?.fault.get().cloned()?;
        let task = self.active.take()?;
        self.strip.revoke();
        Some((task.pattern, fault))
    }

    /// Renderer tasks that currently exist
    #[cfg(test)]
    pub fn live_renderers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of renderer tasks ever alive at the same time
    #[cfg(test)]
    pub fn peak_renderers(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Replace whatever is running with `render`
    pub async fn start(&mut self, pattern: &str, render: RenderFn) {
        self.stop().await;

        let stop = self.shutdown.child_token();
        let alive = Arc::new(AtomicBool::new(true));
        let fault = Arc::new(OnceLock::new());
        let ctx = RenderContext::new(self.strip.lease(), stop.clone());
        let guard = LiveGuard::new(alive.clone(), self.live.clone(), &self.peak);
        let name = pattern.to_string();
        let task_fault = fault.clone();
        let faults = self.faults.clone();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let outcome = AssertUnwindSafe(render(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(RenderFault::Panicked(panic_message(&*panic))));
            match outcome {
                Ok(()) => debug!("[ACTUATOR] Pattern {} finished", name),
                Err(RenderFault::Revoked) => debug!("[ACTUATOR] Pattern {} lost the strip", name),
                Err(fault) => {
                    error!("[ACTUATOR] Pattern {} faulted: {}", name, fault);
                    let _ = task_fault.set(fault);
                    faults.notify_one();
                }
            }
        });

        info!("[ACTUATOR] Started pattern {}", pattern);
        self.active = Some(ActuatorTask {
            pattern: pattern.to_string(),
            alive,
            fault,
            stop,
            handle,
        });
    }

    /// Stop the active renderer and wait for it to end.
    ///
    /// A renderer that ignores the stop signal is aborted once the grace
    /// period runs out; either way its strip lease is revoked.
    pub async fn stop(&mut self) {
        let Some(mut task) = self.active.take() else {
            return;
        };

        task.stop.cancel();
        match timeout(self.grace, &mut task.handle).await {
            Ok(Ok(())) => debug!("[ACTUATOR] Stopped pattern {}", task.pattern),
            Ok(Err(e)) => warn!("[ACTUATOR] Pattern {} task ended: {}", task.pattern, e),
            Err(_) => {
                warn!(
                    "[ACTUATOR] Pattern {} ignored stop for {:?}, aborting",
                    task.pattern, self.grace
                );
                self.strip.revoke();
                task.handle.abort();
                // Aborting lands at the renderer's next await point
                if timeout(self.grace, &mut task.handle).await.is_err() {
                    error!(
                        "[ACTUATOR] Pattern {} did not unwind after abort",
                        task.pattern
                    );
                }
            }
        }
        self.strip.revoke();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::patterns;
    use crate::actuator::strip::tests::RecordingSink;
    use crate::actuator::strip::Color;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use tokio::time::{sleep, Instant};

    fn runner(pixels: usize) -> (Arc<RecordingSink>, AnimationRunner) {
        let sink = RecordingSink::new(pixels);
        let config = RunnerConfig {
            grace: Duration::from_secs(1),
        };
        let runner = AnimationRunner::new(sink.clone(), config, CancellationToken::new());
        (sink, runner)
    }

    /// Keeps drawing and never looks at the stop signal
    fn stubborn(ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
        async move {
            loop {
                let _ = ctx.show(&vec![Color::rgb(1, 2, 3); ctx.len()]);
                sleep(Duration::from_millis(10)).await;
            }
        }
        .boxed()
    }

    fn panicking(_ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
        async move { panic!("bad frame") }.boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop() {
        let (sink, mut runner) = runner(8);
        runner.start("rainbow", patterns::rainbow).await;
        sleep(Duration::from_millis(100)).await;
        assert!(runner.is_running());
        assert_eq!(runner.current(), Some("rainbow"));

        runner.stop().await;
        assert!(!runner.is_running());
        assert_eq!(runner.live_renderers(), 0);
        assert!(sink.frame_count() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_pattern_finishes() {
        let (sink, mut runner) = runner(4);
        runner.start("red", patterns::red).await;
        sleep(Duration::from_millis(10)).await;

        assert!(!runner.is_running());
        assert_eq!(runner.current(), Some("red"));
        assert_eq!(sink.last_frame(), Some(vec![Color::rgb(255, 0, 0); 4]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stubborn_renderer_is_aborted() {
        let (sink, mut runner) = runner(4);
        runner.start("stubborn", stubborn).await;
        sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        runner.stop().await;
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(runner.live_renderers(), 0);

        let frames = sink.frame_count();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.frame_count(), frames);
    }

    fn failing(_ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
        async move { Err(RenderFault::Output("bus error".into())) }.boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_renderer_clears_slot() {
        let (_sink, mut runner) = runner(4);
        let faults = runner.fault_notifier();
        runner.start("panicking", panicking).await;

        timeout(Duration::from_millis(10), faults.notified())
            .await
            .expect("fault reported when it happens");
        assert!(!runner.is_running());
        assert_eq!(runner.current(), None);

        let (pattern, fault) = runner.take_fault().expect("fault");
        assert_eq!(pattern, "panicking");
        assert_eq!(fault, RenderFault::Panicked("bad frame".into()));
        assert!(runner.take_fault().is_none());

        runner.start("blue", patterns::blue).await;
        assert_eq!(runner.current(), Some("blue"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_fault_clears_slot() {
        let (_sink, mut runner) = runner(4);
        runner.start("failing", failing).await;
        sleep(Duration::from_millis(10)).await;

        assert_eq!(runner.current(), None);
        assert_eq!(
            runner.take_fault(),
            Some((
                "failing".to_string(),
                RenderFault::Output("bus error".into())
            ))
        );
        assert_eq!(runner.live_renderers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_pattern_is_not_a_fault() {
        let (_sink, mut runner) = runner(4);
        runner.start("red", patterns::red).await;
        sleep(Duration::from_millis(10)).await;

        assert!(runner.take_fault().is_none());
        assert_eq!(runner.current(), Some("red"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_two_renderers() {
        let (_sink, mut runner) = runner(8);
        let sequence: [(&str, RenderFn); 5] = [
            ("rainbow", patterns::rainbow),
            ("stubborn", stubborn),
            ("theater", patterns::theater),
            ("knightrider", patterns::knightrider),
            ("burst", patterns::burst),
        ];

        for (name, render) in sequence {
            runner.start(name, render).await;
            sleep(Duration::from_millis(30)).await;
            assert_eq!(runner.live_renderers(), 1);
        }
        runner.stop().await;
        assert_eq!(runner.peak_renderers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_renderer() {
        let sink = RecordingSink::new(4);
        let shutdown = CancellationToken::new();
        let mut runner = AnimationRunner::new(sink, RunnerConfig::default(), shutdown.clone());
        runner.start("rainbow", patterns::rainbow).await;
        sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        sleep(Duration::from_millis(50)).await;
        assert!(!runner.is_running());
    }
}
