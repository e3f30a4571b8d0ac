pub mod bkt;
pub mod evidence;
pub mod progress;
