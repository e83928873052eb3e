pub mod debounce;
pub mod keyed_mutex;

pub use debounce::Debounce;
pub use keyed_mutex::KeyedMutex;
