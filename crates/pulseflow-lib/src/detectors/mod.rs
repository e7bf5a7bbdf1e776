pub mod ppg;

pub use ppg::{ElgendiDetector, PeakDetection, PeakDetector};
