// Frame scheduling
//
// The per-frame state machine, kept separate from the Vulkan plumbing so
// the ordering rules can be exercised against an instrumented fake GPU:
//
//   WAIT_FOR_PRIOR_FRAME -> ACQUIRE_IMAGE -> RECORD+SUBMIT -> PRESENT
//
// Exactly one frame is in flight at a time. The fence wait at the top of
// a frame is the single mechanism keeping the CPU from racing ahead of
// the GPU; the semaphores order acquire -> render -> present entirely on
// the GPU side.

use crate::error::RenderError;

/// Result of asking the swapchain for the next presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available; the image-available signal is armed and the
    /// GPU will set it once the image is actually writable.
    Ready { image_index: u32 },
    /// No image within the timeout. The frame is skipped, not failed.
    NotReady,
    /// The swapchain no longer matches the surface. Fatal here: recreation
    /// is out of scope.
    Stale,
}

/// What a single pass through the loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    Skipped,
}

/// GPU-facing capability set the scheduler drives. The Vulkan renderer is
/// the production implementation; tests drive the same state machine
/// through a fake that counts outstanding submissions.
pub trait FrameBackend {
    /// Block until the previous frame's work is confirmed complete, making
    /// the command buffer safe to re-record. Must leave the completion
    /// signal intact if the frame ends up skipped.
    fn wait_for_prior_frame(&mut self) -> Result<(), RenderError>;

    /// Ask for the next presentable image.
    fn acquire_image(&mut self) -> Result<AcquireOutcome, RenderError>;

    /// Re-record the command buffer for `image_index` and submit it,
    /// waiting GPU-side on image availability and signalling completion.
    fn record_and_submit(&mut self, image_index: u32) -> Result<(), RenderError>;

    /// Queue the rendered image for presentation.
    fn present(&mut self, image_index: u32) -> Result<(), RenderError>;

    /// Drain all in-flight work. Called once before teardown.
    fn wait_idle(&mut self) -> Result<(), RenderError>;
}

/// Drives one logical frame at a time through a `FrameBackend`.
pub struct FrameScheduler {
    frames_presented: u64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self { frames_presented: 0 }
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Run one logical frame. A `Skipped` outcome means the swapchain had
    /// no image ready in time; the caller just tries again next iteration.
    /// Any error is fatal and the loop must stop.
    pub fn run_frame<B: FrameBackend>(
        &mut self,
        backend: &mut B,
    ) -> Result<FrameOutcome, RenderError> {
        backend.wait_for_prior_frame()?;

        let image_index = match backend.acquire_image()? {
            AcquireOutcome::Ready { image_index } => image_index,
            AcquireOutcome::NotReady => return Ok(FrameOutcome::Skipped),
            AcquireOutcome::Stale => return Err(RenderError::SurfaceLost),
        };

        backend.record_and_submit(image_index)?;
        backend.present(image_index)?;

        self.frames_presented += 1;
        Ok(FrameOutcome::Presented)
    }

    /// Final device-idle wait once the loop has exited. The last presented
    /// frame is complete before any resource is torn down.
    pub fn drain<B: FrameBackend>(&mut self, backend: &mut B) -> Result<(), RenderError> {
        backend.wait_idle()
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        WaitPrior,
        Acquire,
        Submit(u32),
        Present(u32),
        WaitIdle,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Cmd {
        BeginPass(u32),
        BindPipeline,
        Draw { vertices: u32, instances: u32 },
        EndPass,
    }

    /// Instrumented stand-in for the GPU: scripts acquire outcomes, counts
    /// concurrently-outstanding submissions, logs the command stream per
    /// submit, and tracks resource create/destroy balance.
    struct FakeGpu {
        acquires: VecDeque<AcquireOutcome>,
        calls: Vec<Call>,
        outstanding: u32,
        max_outstanding: u32,
        fence_signaled: bool,
        streams: Vec<Vec<Cmd>>,
        created: Vec<&'static str>,
        destroyed: Rc<RefCell<Vec<&'static str>>>,
    }

    impl FakeGpu {
        fn new(acquires: Vec<AcquireOutcome>) -> Self {
            Self {
                acquires: acquires.into(),
                calls: Vec::new(),
                outstanding: 0,
                max_outstanding: 0,
                fence_signaled: true,
                streams: Vec::new(),
                created: vec!["instance", "device", "swapchain", "image-views", "pipeline"],
                destroyed: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn record_stream(image_index: u32) -> Vec<Cmd> {
            vec![
                Cmd::BeginPass(image_index),
                Cmd::BindPipeline,
                Cmd::Draw {
                    vertices: 3,
                    instances: 1,
                },
                Cmd::EndPass,
            ]
        }
    }

    impl FrameBackend for FakeGpu {
        fn wait_for_prior_frame(&mut self) -> Result<(), RenderError> {
            self.calls.push(Call::WaitPrior);
            // The wait returns only once the GPU has finished the prior frame
            self.outstanding = 0;
            self.fence_signaled = true;
            Ok(())
        }

        fn acquire_image(&mut self) -> Result<AcquireOutcome, RenderError> {
            self.calls.push(Call::Acquire);
            Ok(self
                .acquires
                .pop_front()
                .unwrap_or(AcquireOutcome::Ready { image_index: 0 }))
        }

        fn record_and_submit(&mut self, image_index: u32) -> Result<(), RenderError> {
            assert!(
                self.fence_signaled,
                "submitted without waiting for the prior frame"
            );
            self.calls.push(Call::Submit(image_index));
            self.fence_signaled = false;
            self.outstanding += 1;
            self.max_outstanding = self.max_outstanding.max(self.outstanding);
            self.streams.push(Self::record_stream(image_index));
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> Result<(), RenderError> {
            self.calls.push(Call::Present(image_index));
            Ok(())
        }

        fn wait_idle(&mut self) -> Result<(), RenderError> {
            self.calls.push(Call::WaitIdle);
            self.outstanding = 0;
            Ok(())
        }
    }

    impl Drop for FakeGpu {
        fn drop(&mut self) {
            while let Some(resource) = self.created.pop() {
                self.destroyed.borrow_mut().push(resource);
            }
        }
    }

    #[test]
    fn frame_runs_in_order() {
        let mut gpu = FakeGpu::new(vec![AcquireOutcome::Ready { image_index: 1 }]);
        let mut scheduler = FrameScheduler::new();

        let outcome = scheduler.run_frame(&mut gpu).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(
            gpu.calls,
            vec![
                Call::WaitPrior,
                Call::Acquire,
                Call::Submit(1),
                Call::Present(1)
            ]
        );
    }

    #[test]
    fn never_more_than_one_frame_in_flight() {
        let acquires = (0..32)
            .map(|i| AcquireOutcome::Ready { image_index: i % 3 })
            .collect();
        let mut gpu = FakeGpu::new(acquires);
        let mut scheduler = FrameScheduler::new();

        for _ in 0..32 {
            scheduler.run_frame(&mut gpu).unwrap();
        }

        assert_eq!(gpu.max_outstanding, 1);
        assert_eq!(scheduler.frames_presented(), 32);
    }

    #[test]
    fn stale_swapchain_is_fatal_and_submits_nothing() {
        let mut gpu = FakeGpu::new(vec![AcquireOutcome::Stale]);
        let mut scheduler = FrameScheduler::new();

        let err = scheduler.run_frame(&mut gpu).unwrap_err();

        assert!(matches!(err, RenderError::SurfaceLost));
        assert!(!gpu
            .calls
            .iter()
            .any(|c| matches!(c, Call::Submit(_) | Call::Present(_))));
    }

    #[test]
    fn acquire_timeout_skips_the_frame() {
        let mut gpu = FakeGpu::new(vec![
            AcquireOutcome::NotReady,
            AcquireOutcome::Ready { image_index: 2 },
        ]);
        let mut scheduler = FrameScheduler::new();

        assert_eq!(scheduler.run_frame(&mut gpu).unwrap(), FrameOutcome::Skipped);
        // The skipped frame left the completion signal intact, so the next
        // frame runs normally
        assert_eq!(
            scheduler.run_frame(&mut gpu).unwrap(),
            FrameOutcome::Presented
        );

        let submits = gpu
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Submit(_)))
            .count();
        assert_eq!(submits, 1);
        assert_eq!(scheduler.frames_presented(), 1);
    }

    #[test]
    fn rerecording_the_same_image_is_idempotent() {
        let mut gpu = FakeGpu::new(vec![
            AcquireOutcome::Ready { image_index: 2 },
            AcquireOutcome::Ready { image_index: 2 },
        ]);
        let mut scheduler = FrameScheduler::new();

        scheduler.run_frame(&mut gpu).unwrap();
        scheduler.run_frame(&mut gpu).unwrap();

        assert_eq!(gpu.streams.len(), 2);
        assert_eq!(gpu.streams[0], gpu.streams[1]);
    }

    #[test]
    fn close_request_drains_after_the_last_present() {
        let mut gpu = FakeGpu::new(vec![
            AcquireOutcome::Ready { image_index: 0 },
            AcquireOutcome::Ready { image_index: 1 },
        ]);
        let mut scheduler = FrameScheduler::new();

        // Close observed after the second frame: that frame still completes
        // its present before the drain
        scheduler.run_frame(&mut gpu).unwrap();
        scheduler.run_frame(&mut gpu).unwrap();
        scheduler.drain(&mut gpu).unwrap();

        let submits = gpu
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Submit(_)))
            .count();
        let presents = gpu
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Present(_)))
            .count();
        assert_eq!(submits, presents);
        assert_eq!(gpu.calls.last(), Some(&Call::WaitIdle));
        assert_eq!(gpu.outstanding, 0);
    }

    #[test]
    fn teardown_releases_resources_in_reverse_creation_order() {
        let destroyed = {
            let mut gpu = FakeGpu::new(vec![AcquireOutcome::Ready { image_index: 0 }]);
            let mut scheduler = FrameScheduler::new();
            scheduler.run_frame(&mut gpu).unwrap();
            scheduler.drain(&mut gpu).unwrap();
            let log = Rc::clone(&gpu.destroyed);
            drop(gpu);
            log
        };

        let destroyed = destroyed.borrow();
        assert_eq!(
            *destroyed,
            vec!["pipeline", "image-views", "swapchain", "device", "instance"]
        );
    }
}
