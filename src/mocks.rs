use crate::error::{Result, SegmentationError};
use crate::segmentation::{ElementKind, InferenceBackend, ModelDescriptor, RawOutput, TensorDescriptor};
use ndarray::ArrayView4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Backend that answers every request with a class map derived from the input
///
/// Each output pixel gets the class `round(mean of the input pixel) % classes`,
/// written either as one-hot score planes (`[1, classes, H, W]`, `f32`) or as
/// a class-id map (`[1, H, W]`, `i64`). Calls listed in `fail_on_calls`
/// return a backend error instead, which lets tests check per-frame error
/// delivery.
#[derive(Debug)]
pub struct MockBackend {
    pub input_size: (u32, u32),
    pub output_size: (u32, u32),
    pub classes: usize,
    pub class_ids: bool,
    pub delay: Option<Duration>,
    pub fail_on_calls: Vec<usize>,
    calls: AtomicUsize,
}

impl MockBackend {
    /// Mock producing per-class score planes
    pub fn new(input_size: (u32, u32), output_size: (u32, u32), classes: usize) -> Self {
        Self {
            input_size,
            output_size,
            classes: classes.max(1),
            class_ids: false,
            delay: None,
            fail_on_calls: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Mock producing a single-channel map of class ids
    pub fn class_ids(input_size: (u32, u32), output_size: (u32, u32), classes: usize) -> Self {
        Self {
            class_ids: true,
            ..Self::new(input_size, output_size, classes)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_on(mut self, calls: Vec<usize>) -> Self {
        self.fail_on_calls = calls;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModelDescriptor for MockBackend {
    fn input_descriptors(&self) -> Vec<TensorDescriptor> {
        let (w, h) = self.input_size;
        vec![TensorDescriptor::new(
            "image",
            vec![1, 3, h as i64, w as i64],
            ElementKind::Float32,
        )]
    }

    fn output_descriptors(&self) -> Vec<TensorDescriptor> {
        let (w, h) = self.output_size;
        let (dims, element) = if self.class_ids {
            (vec![1, h as i64, w as i64], ElementKind::Int64)
        } else {
            (vec![1, self.classes as i64, h as i64, w as i64], ElementKind::Float32)
        };
        vec![TensorDescriptor::new("mask", dims, element)]
    }
}

impl InferenceBackend for MockBackend {
    fn infer(&self, input: ArrayView4<f32>) -> Result<RawOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_on_calls.contains(&call) {
            return Err(SegmentationError::Backend {
                operation: format!("mock inference call {}", call),
                source: "injected failure".into(),
            });
        }

        let (in_w, in_h) = self.input_size;
        let (out_w, out_h) = self.output_size;
        let plane = (out_w * out_h) as usize;
        let classes = self.classes;

        let class_at = |x: u32, y: u32| -> usize {
            let ix = (x * in_w / out_w) as usize;
            let iy = (y * in_h / out_h) as usize;
            let mean = (0..3).map(|c| input[[0, c, iy, ix]]).sum::<f32>() / 3.0;
            (mean.round().max(0.0) as usize) % classes
        };

        if !self.class_ids {
            let mut scores = vec![0.0f32; plane * classes];
            for y in 0..out_h {
                for x in 0..out_w {
                    let pixel = (y * out_w + x) as usize;
                    scores[class_at(x, y) * plane + pixel] = 1.0;
                }
            }
            Ok(RawOutput::Float(scores))
        } else {
            let ids = (0..out_h)
                .flat_map(|y| (0..out_w).map(move |x| (x, y)))
                .map(|(x, y)| class_at(x, y) as i64)
                .collect();
            Ok(RawOutput::Int(ids))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_mock_descriptors() {
        let mock = MockBackend::new((8, 4), (4, 2), 3);
        assert_eq!(mock.input_descriptors()[0].dims, vec![1, 3, 4, 8]);
        assert_eq!(mock.output_descriptors()[0].dims, vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_mock_scores_are_one_hot() -> Result<()> {
        let mock = MockBackend::new((4, 4), (2, 2), 3);
        let input = Array4::<f32>::from_elem((1, 3, 4, 4), 2.0);

        let output = mock.infer(input.view())?;
        match output {
            RawOutput::Float(scores) => {
                assert_eq!(scores.len(), 12);
                // Every pixel votes for class 2
                assert_eq!(&scores[8..12], &[1.0, 1.0, 1.0, 1.0]);
            }
            other => panic!("unexpected output {:?}", other),
        }
        assert_eq!(mock.call_count(), 1);
        Ok(())
    }

    #[test]
    fn test_mock_class_ids() -> Result<()> {
        let mock = MockBackend::class_ids((2, 2), (1, 1), 4);
        assert_eq!(mock.output_descriptors()[0].dims, vec![1, 1, 1]);

        let input = Array4::<f32>::from_elem((1, 3, 2, 2), 6.0);
        assert_eq!(mock.infer(input.view())?, RawOutput::Int(vec![2]));
        Ok(())
    }

    #[test]
    fn test_mock_injected_failure() {
        let mock = MockBackend::class_ids((2, 2), (2, 2), 4).failing_on(vec![0]);
        let input = Array4::<f32>::zeros((1, 3, 2, 2));
        assert!(mock.infer(input.view()).is_err());
        assert!(mock.infer(input.view()).is_ok());
    }
}
