//! Built-in light patterns
//!
//! Every renderer takes a [`RenderContext`] and returns once it is finished
//! or asked to stop. Looping patterns check the stop signal at every frame.

use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use super::strip::{wheel, Color, RenderFault, StripLease};

/// Signature shared by all renderers
pub type RenderFn = fn(RenderContext) -> BoxFuture<'static, Result<(), RenderFault>>;

/// What a renderer gets to work with
#[derive(Clone)]
pub struct RenderContext {
    strip: StripLease,
    stop: CancellationToken,
}

impl RenderContext {
    pub fn new(strip: StripLease, stop: CancellationToken) -> Self {
        Self { strip, stop }
    }

    pub fn len(&self) -> usize {
        self.strip.len()
    }

    pub fn show(&self, frame: &[Color]) -> Result<(), RenderFault> {
        self.strip.show(frame)
    }

    /// Sleep between frames. Returns false if stop was requested meanwhile.
    pub async fn pause(&self, period: Duration) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => false,
            _ = sleep(period) => true,
        }
    }
}

pub fn off(ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
    async move {
        wipe(&ctx, Color::BLACK, Duration::from_millis(10)).await?;
        // The wipe may have been cut short; leave the strip dark either way
        ctx.show(&vec![Color::BLACK; ctx.len()])
    }
    .boxed()
}

pub fn red(ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
    async move { solid(&ctx, Color::rgb(255, 0, 0)) }.boxed()
}

pub fn blue(ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
    async move { solid(&ctx, Color::rgb(0, 0, 255)) }.boxed()
}

pub fn white(ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
    async move { solid(&ctx, Color::rgb(127, 127, 127)) }.boxed()
}

pub fn christmas(ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
    async move { alternate(&ctx, Color::rgb(255, 0, 0), Color::rgb(0, 255, 0)) }.boxed()
}

pub fn nicaragua(ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
    async move { alternate(&ctx, Color::rgb(0, 0, 127), Color::rgb(127, 127, 127)) }.boxed()
}

pub fn canada(ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
    async move { alternate(&ctx, Color::rgb(127, 0, 0), Color::rgb(127, 127, 127)) }.boxed()
}

pub fn rainbow(ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
    async move {
        while rainbow_cycle(&ctx, Duration::from_millis(20)).await? {}
        Ok(())
    }
    .boxed()
}

pub fn theater(ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
    async move {
        let colors = [
            Color::rgb(127, 127, 127),
            Color::rgb(127, 0, 0),
            Color::rgb(0, 0, 127),
        ];
        loop {
            for color in colors {
                if !theater_chase(&ctx, color, Duration::from_millis(50), 10).await? {
                    return Ok(());
                }
            }
        }
    }
    .boxed()
}

pub fn knightrider(ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
    async move {
        const WIDTH: usize = 5;
        let color = Color::rgb(127, 0, 0);
        let len = ctx.len();
        let period = Duration::from_millis(7);
        if len == 0 {
            return Ok(());
        }

        let forward = 0..len;
        let backward = (0..len).rev();
        let sweep = forward.map(|i| (i, true)).chain(backward.map(|i| (i, false)));
        let sweep: Vec<_> = sweep.collect();

        loop {
            for &(head, ahead) in &sweep {
                let mut frame = vec![Color::BLACK; len];
                frame[head] = color;
                for w in 1..=WIDTH {
                    let tail = if ahead {
                        head.checked_sub(w)
                    } else {
                        Some(head + w).filter(|t| *t < len)
                    };
                    if let Some(t) = tail {
                        frame[t] = color.dim();
                    }
                }
                ctx.show(&frame)?;
                if !ctx.pause(period).await {
                    return Ok(());
                }
            }
        }
    }
    .boxed()
}

pub fn burst(ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
    async move {
        const CYCLE: u32 = 40;
        let len = ctx.len();
        let period = Duration::from_millis(1000 / 60);
        let mut first = ColorBurst::random(len);
        let mut second = ColorBurst::random(len);

        for t in 0u32.. {
            if t % CYCLE == 0 {
                first = ColorBurst::random(len);
            }
            if t > 0 && t % CYCLE == 30 {
                second = ColorBurst::random(len);
            }

            let mut frame = vec![Color::BLACK; len];
            first.draw(&mut frame, (t % CYCLE) as f32);
            second.draw(&mut frame, ((t + CYCLE - 30) % CYCLE) as f32);
            ctx.show(&frame)?;

            if !ctx.pause(period).await {
                break;
            }
        }
        Ok(())
    }
    .boxed()
}

/// Strand test: one pass through wipes, chases and rainbows
pub fn test(ctx: RenderContext) -> BoxFuture<'static, Result<(), RenderFault>> {
    async move {
        let wipe_period = Duration::from_millis(50);
        for color in [
            Color::rgb(255, 0, 0),
            Color::rgb(0, 255, 0),
            Color::rgb(0, 0, 255),
        ] {
            if !wipe(&ctx, color, wipe_period).await? {
                return Ok(());
            }
        }
        for color in [
            Color::rgb(127, 127, 127),
            Color::rgb(127, 0, 0),
            Color::rgb(0, 0, 127),
        ] {
            if !theater_chase(&ctx, color, Duration::from_millis(50), 10).await? {
                return Ok(());
            }
        }
        rainbow_cycle(&ctx, Duration::from_millis(20)).await?;
        Ok(())
    }
    .boxed()
}

fn solid(ctx: &RenderContext, color: Color) -> Result<(), RenderFault> {
    ctx.show(&vec![color; ctx.len()])
}

fn alternate(ctx: &RenderContext, even: Color, odd: Color) -> Result<(), RenderFault> {
    let frame: Vec<_> = (0..ctx.len())
        .map(|i| if i % 2 == 0 { even } else { odd })
        .collect();
    ctx.show(&frame)
}

/// Paint `color` across the strip one pixel at a time
async fn wipe(ctx: &RenderContext, color: Color, period: Duration) -> Result<bool, RenderFault> {
    let mut frame = vec![Color::BLACK; ctx.len()];
    for i in 0..frame.len() {
        frame[i] = color;
        ctx.show(&frame)?;
        if !ctx.pause(period).await {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn theater_chase(
    ctx: &RenderContext,
    color: Color,
    period: Duration,
    iterations: usize,
) -> Result<bool, RenderFault> {
    let len = ctx.len();
    for _ in 0..iterations {
        for offset in 0..3 {
            let frame: Vec<_> = (0..len)
                .map(|i| if i % 3 == offset { color } else { Color::BLACK })
                .collect();
            ctx.show(&frame)?;
            if !ctx.pause(period).await {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// One full turn of the colour wheel spread evenly over the strip
async fn rainbow_cycle(ctx: &RenderContext, period: Duration) -> Result<bool, RenderFault> {
    let len = ctx.len().max(1);
    for step in 0..256usize {
        let frame: Vec<_> = (0..len)
            .map(|i| wheel(((i * 256 / len + step) & 255) as u8))
            .collect();
        ctx.show(&frame)?;
        if !ctx.pause(period).await {
            return Ok(false);
        }
    }
    Ok(true)
}

/// A spray of particles flying out from one point and fading
struct ColorBurst {
    particles: Vec<Particle>,
}

struct Particle {
    color: Color,
    origin: f32,
    velocity: f32,
    drag: f32,
    fade_time: f32,
}

impl ColorBurst {
    fn random(len: usize) -> Self {
        let mut rng = rand::thread_rng();
        let center = rng.gen_range(0..len.max(1)) as f32;
        let hue: i32 = rng.gen_range(0..=255);
        let count = rng.gen_range(20..=35);

        let particles = (0..count)
            .map(|_| Particle {
                color: wheel((hue + rng.gen_range(-20..=20)).rem_euclid(256) as u8),
                origin: center,
                velocity: rng.gen_range(-3.0..=3.0),
                drag: rng.gen_range(0.0..=0.05),
                fade_time: rng.gen_range(10.0..=30.0),
            })
            .collect();
        Self { particles }
    }

    fn draw(&self, frame: &mut [Color], t: f32) {
        for p in &self.particles {
            let position = p.origin + p.velocity / (1.0 + p.drag * t) * t;
            if position < 0.0 {
                continue;
            }
            if let Some(pixel) = frame.get_mut(position as usize) {
                *pixel = p.color.fade(t / p.fade_time);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::strip::tests::RecordingSink;
    use crate::actuator::strip::Strip;

    fn context(
        pixels: usize,
    ) -> (
        std::sync::Arc<RecordingSink>,
        Strip,
        RenderContext,
        CancellationToken,
    ) {
        let sink = RecordingSink::new(pixels);
        let strip = Strip::new(sink.clone());
        let stop = CancellationToken::new();
        let ctx = RenderContext::new(strip.lease(), stop.clone());
        (sink, strip, ctx, stop)
    }

    #[tokio::test]
    async fn test_christmas_alternates() {
        let (sink, _strip, ctx, _stop) = context(4);
        christmas(ctx).await.expect("render");

        let frame = sink.last_frame().expect("frame");
        assert_eq!(frame[0], Color::rgb(255, 0, 0));
        assert_eq!(frame[1], Color::rgb(0, 255, 0));
        assert_eq!(frame[2], Color::rgb(255, 0, 0));
        assert_eq!(sink.frame_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_leaves_strip_dark() {
        let (sink, _strip, ctx, _stop) = context(8);
        off(ctx).await.expect("render");
        let frame = sink.last_frame().expect("frame");
        assert!(frame.iter().all(Color::is_black));
    }

    #[tokio::test(start_paused = true)]
    async fn test_looping_pattern_honours_stop() {
        let (sink, _strip, ctx, stop) = context(8);
        let handle = tokio::spawn(rainbow(ctx));

        sleep(Duration::from_millis(100)).await;
        stop.cancel();
        handle.await.expect("join").expect("render");
        assert!(sink.frame_count() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoked_lease_faults() {
        let (_sink, strip, ctx, _stop) = context(8);
        let handle = tokio::spawn(knightrider(ctx));

        sleep(Duration::from_millis(50)).await;
        strip.revoke();
        let result = handle.await.expect("join");
        assert_eq!(result, Err(RenderFault::Revoked));
    }

    #[test]
    fn test_burst_draws_within_bounds() {
        let burst = ColorBurst::random(10);
        let mut frame = vec![Color::BLACK; 10];
        for t in 0..40 {
            burst.draw(&mut frame, t as f32);
        }
        assert_eq!(frame.len(), 10);
    }
}
