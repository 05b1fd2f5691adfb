/// Errors that end a calibration run.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("not enough valid detections: found {found}, need {required}")]
    NotEnoughDetections { found: usize, required: usize },
    #[error("no images found")]
    NoImages,
    #[error("aborted")]
    Aborted,
    #[error("calibration solver failed: {0}")]
    Solver(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
