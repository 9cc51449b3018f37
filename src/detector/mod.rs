pub mod anomaly;
pub mod throttle;

pub use anomaly::detect;
pub use throttle::AlertThrottle;
