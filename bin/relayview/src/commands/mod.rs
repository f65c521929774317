pub mod play;
pub mod ptz;
pub mod streams;
