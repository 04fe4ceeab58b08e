//! Accuracy metrics shared by the benchmark datasets.
//!
//! Each metric is an incremental accumulator: samples are fed one at a time while
//! the benchmark runs, and the final number is only computed when asked for.

pub mod detection;
pub mod segmentation;
pub mod squad;
pub mod topk;

pub use detection::{AveragePrecision, BoundingBox, DetectedObject, GroundTruthObject};
pub use segmentation::IouAccumulator;
pub use squad::{answer_text, best_span, final_text, is_result_match, normalize_answer};
pub use topk::{argmax_with_offset, top_k_with_offset};
