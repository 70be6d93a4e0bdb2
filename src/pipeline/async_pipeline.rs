use crate::error::{Result, SegmentationError};
use crate::segmentation::{InferenceBackend, Preprocessor, RawOutput};
use image::RgbImage;
use ndarray::Array4;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Output of one finished inference request
#[derive(Debug)]
pub struct RequestResult<T> {
    pub frame_id: u64,
    pub output: RawOutput,
    /// Size of the submitted frame as (width, height)
    pub frame_size: (u32, u32),
    pub extra_data: T,
    pub started: Instant,
}

struct Job<T> {
    frame_id: u64,
    tensor: Array4<f32>,
    frame_size: (u32, u32),
    extra_data: T,
    started: Instant,
}

struct State<T> {
    jobs: VecDeque<Job<T>>,
    completed: BTreeMap<u64, Result<RequestResult<T>>>,
    idle_slots: usize,
    in_flight: usize,
    next_input_id: u64,
    next_output_id: u64,
    shutdown: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    work_ready: Condvar,
    completion: Condvar,
}

/// Fixed pool of in-flight inference requests with in-order delivery
///
/// Each request slot is served by one worker thread. Frames get increasing
/// ids at submission; results are handed out strictly in id order, so a slow
/// request holds back the ones submitted after it.
pub struct AsyncPipeline<B: InferenceBackend + 'static, T: Send + 'static> {
    backend: Arc<B>,
    preprocessor: Preprocessor,
    shared: Arc<Shared<T>>,
    workers: Vec<JoinHandle<()>>,
    num_requests: usize,
}

impl<B: InferenceBackend + 'static, T: Send + 'static> AsyncPipeline<B, T> {
    pub fn new(backend: Arc<B>, preprocessor: Preprocessor, num_requests: usize) -> Result<Self> {
        if num_requests == 0 {
            return Err(SegmentationError::configuration(
                "async pipeline needs at least one request slot",
            ));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                completed: BTreeMap::new(),
                idle_slots: num_requests,
                in_flight: 0,
                next_input_id: 0,
                next_output_id: 0,
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            completion: Condvar::new(),
        });

        let workers = (0..num_requests)
            .map(|index| {
                let backend = Arc::clone(&backend);
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("infer-request-{}", index))
                    .spawn(move || worker_loop(backend, shared))
                    .map_err(|e| SegmentationError::Backend {
                        operation: "spawn inference worker".to_string(),
                        source: Box::new(e),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("Async pipeline started with {} request slot(s)", num_requests);

        Ok(Self {
            backend,
            preprocessor,
            shared,
            workers,
            num_requests,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn num_requests(&self) -> usize {
        self.num_requests
    }

    /// True while a request slot is free
    pub fn is_ready_to_process(&self) -> bool {
        self.shared.state.lock().idle_slots > 0
    }

    /// Queue a frame for inference
    ///
    /// Returns the frame id, or `None` when every request slot is busy.
    pub fn submit(&self, frame: &RgbImage, extra_data: T) -> Result<Option<u64>> {
        {
            let state = self.shared.state.lock();
            if state.shutdown {
                return Err(SegmentationError::PipelineClosed);
            }
            if state.idle_slots == 0 {
                return Ok(None);
            }
        }

        let started = Instant::now();
        let tensor = self.preprocessor.preprocess(frame);

        let mut state = self.shared.state.lock();
        // A concurrent submit may have taken the slot while we preprocessed
        if state.shutdown {
            return Err(SegmentationError::PipelineClosed);
        }
        if state.idle_slots == 0 {
            return Ok(None);
        }
        let frame_id = state.next_input_id;
        state.next_input_id += 1;
        state.idle_slots -= 1;
        state.in_flight += 1;
        state.jobs.push_back(Job {
            frame_id,
            tensor,
            frame_size: frame.dimensions(),
            extra_data,
            started,
        });
        self.shared.work_ready.notify_one();

        tracing::trace!("Submitted frame {}", frame_id);
        Ok(Some(frame_id))
    }

    /// Next result in frame order, without blocking
    ///
    /// A failed request is returned as `Err` in its own position.
    pub fn get_result(&self) -> Option<Result<RequestResult<T>>> {
        let mut state = self.shared.state.lock();
        let next = state.next_output_id;
        let result = state.completed.remove(&next)?;
        state.next_output_id += 1;
        Some(result)
    }

    /// True when the next in-order result is ready
    pub fn has_completed_request(&self) -> bool {
        let state = self.shared.state.lock();
        state.completed.contains_key(&state.next_output_id)
    }

    /// Block until the next in-order result is ready or a slot is free
    pub fn wait_for_data(&self) {
        let mut state = self.shared.state.lock();
        while !state.completed.contains_key(&state.next_output_id) && state.idle_slots == 0 {
            self.shared.completion.wait(&mut state);
        }
    }

    /// Block until every submitted request has finished
    pub fn wait_for_total_completion(&self) {
        let mut state = self.shared.state.lock();
        while state.in_flight > 0 {
            self.shared.completion.wait(&mut state);
        }
    }
}

impl<B: InferenceBackend + 'static, T: Send + 'static> Drop for AsyncPipeline<B, T> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            let dropped = state.jobs.len();
            state.jobs.clear();
            if dropped > 0 {
                tracing::debug!("Discarding {} queued request(s) on shutdown", dropped);
            }
        }
        self.shared.work_ready.notify_all();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("Inference worker panicked");
            }
        }
    }
}

fn worker_loop<B: InferenceBackend, T: Send>(backend: Arc<B>, shared: Arc<Shared<T>>) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                shared.work_ready.wait(&mut state);
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend.infer(job.tensor.view())))
            .unwrap_or_else(|_| {
                Err(SegmentationError::Backend {
                    operation: "inference".to_string(),
                    source: "backend panicked".into(),
                })
            });

        let completion = match outcome {
            Ok(output) => Ok(RequestResult {
                frame_id: job.frame_id,
                output,
                frame_size: job.frame_size,
                extra_data: job.extra_data,
                started: job.started,
            }),
            Err(err) => {
                tracing::warn!("Inference failed for frame {}: {}", job.frame_id, err);
                Err(SegmentationError::RequestFailed {
                    frame_id: job.frame_id,
                    source: Box::new(err),
                })
            }
        };

        let mut state = shared.state.lock();
        state.completed.insert(job.frame_id, completion);
        state.idle_slots += 1;
        state.in_flight -= 1;
        shared.completion.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockBackend;
    use image::Rgb;
    use std::time::Duration;

    fn pipeline(backend: MockBackend, slots: usize) -> AsyncPipeline<MockBackend, u32> {
        let preprocessor = Preprocessor::new(backend.input_size.0, backend.input_size.1);
        AsyncPipeline::new(Arc::new(backend), preprocessor, slots).unwrap()
    }

    #[test]
    fn test_slots_limit_submissions() {
        let backend = MockBackend::class_ids((4, 4), (4, 4), 4).with_delay(Duration::from_millis(50));
        let pipeline = pipeline(backend, 2);
        let frame = RgbImage::new(4, 4);

        assert_eq!(pipeline.submit(&frame, 0).unwrap(), Some(0));
        assert_eq!(pipeline.submit(&frame, 1).unwrap(), Some(1));
        assert!(!pipeline.is_ready_to_process());
        assert_eq!(pipeline.submit(&frame, 2).unwrap(), None);

        pipeline.wait_for_total_completion();
        assert!(pipeline.is_ready_to_process());
        assert_eq!(pipeline.submit(&frame, 2).unwrap(), Some(2));
    }

    #[test]
    fn test_results_in_frame_order() {
        let backend = MockBackend::class_ids((2, 2), (2, 2), 4);
        let pipeline = pipeline(backend, 3);
        let frame = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));

        for extra in 10..13 {
            pipeline.submit(&frame, extra).unwrap();
        }
        pipeline.wait_for_total_completion();

        let ids: Vec<_> = std::iter::from_fn(|| pipeline.get_result())
            .map(|r| {
                let r = r.unwrap();
                (r.frame_id, r.extra_data)
            })
            .collect();
        assert_eq!(ids, vec![(0, 10), (1, 11), (2, 12)]);
        assert!(pipeline.get_result().is_none());
    }

    #[test]
    fn test_failure_is_reported_for_its_frame() {
        let backend = MockBackend::class_ids((2, 2), (2, 2), 4).failing_on(vec![0]);
        let pipeline = pipeline(backend, 1);
        let frame = RgbImage::new(2, 2);

        pipeline.submit(&frame, 0).unwrap();
        pipeline.wait_for_total_completion();
        pipeline.submit(&frame, 1).unwrap();
        pipeline.wait_for_total_completion();

        match pipeline.get_result() {
            Some(Err(SegmentationError::RequestFailed { frame_id, .. })) => assert_eq!(frame_id, 0),
            other => panic!("expected failure for frame 0, got {:?}", other.map(|r| r.is_ok())),
        }
        let second = pipeline.get_result().unwrap().unwrap();
        assert_eq!(second.frame_id, 1);
    }

    #[test]
    fn test_wait_for_data_returns_with_result() {
        let backend = MockBackend::class_ids((2, 2), (2, 2), 4).with_delay(Duration::from_millis(20));
        let pipeline = pipeline(backend, 1);
        let frame = RgbImage::new(2, 2);

        pipeline.submit(&frame, 0).unwrap();
        pipeline.wait_for_data();
        assert!(pipeline.has_completed_request());
        assert_eq!(pipeline.get_result().unwrap().unwrap().frame_size, (2, 2));
    }

    #[test]
    fn test_zero_slots_rejected() {
        let backend = MockBackend::class_ids((2, 2), (2, 2), 4);
        let result = AsyncPipeline::<_, ()>::new(Arc::new(backend), Preprocessor::new(2, 2), 0);
        assert!(matches!(result, Err(SegmentationError::Configuration { .. })));
    }
}
