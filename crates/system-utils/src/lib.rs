pub mod clock;
pub mod delay;
pub mod path;
