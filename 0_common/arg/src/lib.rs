mod arg;

pub use arg::Arg;
