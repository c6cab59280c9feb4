//! Stage hardware: the GSC-01 codec and driver, plus a simulated controller.

pub mod capabilities;
pub mod gsc01;
pub mod mock;
pub mod protocol;
pub mod wait;

pub use gsc01::{Calibration, Gsc01Driver, Gsc01Options, StageStatus};
pub use protocol::{Command, Reply, SpeedProfile};
pub use wait::{CancelToken, WaitPolicy};
