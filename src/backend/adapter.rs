use crate::detection::{Detection, Image};
use crate::error::BackendError;

/// Uniform contract every detector backend implements.
///
/// Calls are synchronous and never overlap: the detection service owns the
/// adapter and serialises requests, so implementations need not be
/// re-entrant. A failure on one frame must come back as
/// [`BackendError::Inference`] (or another `BackendError`) rather than a panic.
///
/// # Example
///
/// ```
/// use berry_perception::{BackendAdapter, Detection, Image, Rect};
/// use berry_perception::error::BackendError;
///
/// struct Fixed;
///
/// impl BackendAdapter for Fixed {
///     fn get_detections(
///         &mut self,
///         _colour: &Image,
///         _depth: Option<&Image>,
///     ) -> Result<Vec<Detection>, BackendError> {
///         Ok(vec![Detection::new(Rect::new(0.0, 0.0, 8.0, 8.0), "berry", 0.8)])
///     }
/// }
/// ```
pub trait BackendAdapter: Send {
    /// Run inference on one colour frame and its optional aligned depth frame.
    ///
    /// Frame id and stamp on the returned records are filled in by the service.
    fn get_detections(
        &mut self,
        colour: &Image,
        depth: Option<&Image>,
    ) -> Result<Vec<Detection>, BackendError>;
}

impl<T: BackendAdapter + ?Sized> BackendAdapter for Box<T> {
    fn get_detections(
        &mut self,
        colour: &Image,
        depth: Option<&Image>,
    ) -> Result<Vec<Detection>, BackendError> {
        (**self).get_detections(colour, depth)
    }
}
